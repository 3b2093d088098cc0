use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use talkfeed::daemon::Role;
use talkfeed::normalize::normalize;
use talkfeed::voice::{GoogleTts, SpeechSynthesizer, validate_mp3};
use talkfeed::{Config, Daemon};

/// talkfeed - Telegram channels read aloud
#[derive(Parser)]
#[command(name = "talkfeed", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use the in-process broker instead of Iggy
    #[arg(long, env = "TALKFEED_MEMORY_BROKER", global = true)]
    memory_broker: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot, both stages and the API in one process
    Run,
    /// Run only the conversation bot
    Bot,
    /// Run only the fetch stage
    Fetcher,
    /// Run only the synth stage
    Synth,
    /// Synthesize one text and write the MP3 to a file
    TestTts {
        /// Text to speak
        #[arg(default_value = "Привет! Это проверка синтеза речи.")]
        text: String,
        /// Output file
        #[arg(short, long, default_value = "test-tts.mp3")]
        out: PathBuf,
        /// Speaking rate
        #[arg(short, long, default_value_t = 1.0)]
        rate: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,talkfeed=info",
        1 => "info,talkfeed=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let role = match cli.command.unwrap_or(Command::Run) {
        Command::Run => Role::All,
        Command::Bot => Role::Bot,
        Command::Fetcher => Role::Fetcher,
        Command::Synth => Role::Synth,
        Command::TestTts { text, out, rate } => return test_tts(&config, &text, &out, rate).await,
    };

    tracing::info!(?role, memory_broker = cli.memory_broker, "starting talkfeed");
    Daemon::new(config, role, cli.memory_broker).run().await?;
    Ok(())
}

async fn test_tts(config: &Config, text: &str, out: &Path, rate: f64) -> anyhow::Result<()> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        anyhow::bail!("nothing left to speak after normalization");
    }
    println!("Synthesizing: \"{normalized}\"");

    let provider = GoogleTts::from_credentials_file(config.credentials_file()?)?;
    let synthesizer = SpeechSynthesizer::new(
        Arc::new(provider),
        config.voice.params.clone(),
        1,
    );

    let audio = synthesizer
        .synthesize(&BTreeMap::from([(0, normalized)]), rate)
        .await?;
    let frames = validate_mp3(&audio)?;

    tokio::fs::write(out, &audio).await?;
    println!("Wrote {} bytes ({frames} frames) to {}", audio.len(), out.display());
    Ok(())
}
