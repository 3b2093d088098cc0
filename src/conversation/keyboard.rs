//! Menu labels and reply keyboards

use crate::channels::Keyboard;

/// Main menu: start channel input
pub const CHOOSE_CHANNEL: &str = "Выбрать канал";
/// Main menu: open the rate menu
pub const SPEECH_RATE: &str = "Скорость речи";
/// Main menu: open the window menu
pub const TIME_WINDOW: &str = "Период времени";
/// Main menu: submit the request
pub const SUBMIT: &str = "Отправить";
/// Return to the main menu
pub const BACK: &str = "Назад";
/// Start command
pub const START: &str = "/start";

/// Selectable speaking rates
pub const RATE_VALUES: [&str; 6] = ["0.5", "0.75", "1.0", "1.2", "1.5", "2.0"];

/// Selectable lookback windows, in hours
pub const WINDOW_VALUES: [&str; 6] = ["1", "2", "3", "4", "5", "6"];

#[must_use]
pub fn main_menu() -> Keyboard {
    Keyboard::new(&[&[CHOOSE_CHANNEL, SPEECH_RATE], &[TIME_WINDOW, SUBMIT]])
}

#[must_use]
pub fn rate_menu() -> Keyboard {
    Keyboard::new(&[&RATE_VALUES[..3], &RATE_VALUES[3..], &[BACK]])
}

#[must_use]
pub fn window_menu() -> Keyboard {
    Keyboard::new(&[&WINDOW_VALUES[..3], &WINDOW_VALUES[3..], &[BACK]])
}

#[must_use]
pub fn back_only() -> Keyboard {
    Keyboard::new(&[&[BACK]])
}

/// Parse a rate button label
#[must_use]
pub fn parse_rate(label: &str) -> Option<f64> {
    RATE_VALUES
        .contains(&label)
        .then(|| label.parse().ok())
        .flatten()
}

/// Parse a window button label
#[must_use]
pub fn parse_window(label: &str) -> Option<u32> {
    WINDOW_VALUES
        .contains(&label)
        .then(|| label.parse().ok())
        .flatten()
}
