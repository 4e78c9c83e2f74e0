use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use voicebridge::api::ApiServer;
use voicebridge::config::ConfigOverrides;
use voicebridge::{Collaborators, Config};

/// Voicebridge - voice conversation relay for browser clients
#[derive(Parser)]
#[command(name = "voicebridge", version, about)]
struct Cli {
    /// Path to a TOML config file (default: platform config dir)
    #[arg(short, long, env = "VOICEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Load and validate configuration, then print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicebridge=info",
        1 => "info,voicebridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        config_path: cli.config,
        host: cli.host,
        port: cli.port,
    };
    let config = Config::load(&overrides)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => {
            print_summary(&config);
            Collaborators::from_config(&config)?;
            println!("configuration OK");
            Ok(())
        }
        Command::Serve => {
            tracing::info!(
                addr = %config.bind_addr(),
                model = %config.llm.model,
                stt = ?config.stt.provider,
                tts = ?config.tts.provider,
                "starting voicebridge"
            );
            let collaborators = Collaborators::from_config(&config)?;
            ApiServer::new(&config, collaborators).run().await?;
            Ok(())
        }
    }
}

fn print_summary(config: &Config) {
    let key_state = |key: Option<&secrecy::SecretString>| {
        if key.is_some_and(|k| !k.expose_secret().is_empty()) {
            "set"
        } else {
            "missing"
        }
    };

    println!("listen:            {}", config.bind_addr());
    println!("max message bytes: {}", config.server.max_message_bytes);
    println!(
        "utterance:         {} ms quiet, {} chunks or {} bytes",
        config.audio.quiet_interval.as_millis(),
        config.audio.min_chunks,
        config.audio.min_bytes
    );
    println!("sample rate:       {} Hz", config.audio.sample_rate);
    println!(
        "workers:           {} (timeouts {:?} / {:?} / {:?})",
        config.pipeline.worker_pool_size,
        config.pipeline.recognition_timeout,
        config.pipeline.generation_timeout,
        config.pipeline.synthesis_timeout
    );
    println!(
        "history:           {} entries, {} rounds of context",
        config.pipeline.history_cap, config.pipeline.history_rounds
    );
    println!(
        "llm:               {} at {} (key {})",
        config.llm.model,
        config.llm.base_url,
        key_state(config.llm.api_key.as_ref())
    );
    println!(
        "stt:               {:?} (key {})",
        config.stt.provider,
        key_state(config.stt.api_key.as_ref())
    );
    println!(
        "tts:               {:?} (key {})",
        config.tts.provider,
        key_state(config.tts.api_key.as_ref())
    );
}
