//! Text normalization for speech synthesis
//!
//! Channel posts carry links, emoji, hashtags and markup the speech provider
//! either reads out literally or rejects. [`normalize`] reduces a post to the
//! characters worth speaking and bounds its size to what one provider call accepts.

/// Maximum normalized text size in bytes
pub const MAX_TEXT_BYTES: usize = 4800;

/// Punctuation kept alongside letters and spaces
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '—', '–', '-', '(', ')', '«', '»', '"', '\'', '“', '”', '‘',
    '’',
];

/// Whether a character survives normalization (line breaks are handled separately)
#[must_use]
pub fn is_allowed(c: char) -> bool {
    matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' | ' ') || ALLOWED_PUNCTUATION.contains(&c)
}

/// Normalize raw post text into speakable, size-bounded text
///
/// Lines are filtered to the allow-list and blank lines are dropped, then the
/// result is cut to [`MAX_TEXT_BYTES`] on a character boundary. Never fails;
/// empty input yields empty output, and normalizing twice changes nothing.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut out = drop_blank_lines(
        raw.lines()
            .map(|line| line.chars().filter(|c| is_allowed(*c)).collect::<String>()),
    );

    if out.len() > MAX_TEXT_BYTES {
        let mut cut = MAX_TEXT_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);

        // The cut can leave a whitespace-only tail line, or nothing but whitespace
        out = drop_blank_lines(out.lines().map(str::to_string));
    }

    out
}

fn drop_blank_lines(lines: impl Iterator<Item = String>) -> String {
    lines
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
