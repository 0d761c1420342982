use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_agent::SentenceSegmenter;
use parley_core::config::{Config, LoggingConfig};
use parley_gateway::GatewayState;
use parley_tts::{SovitsBackend, SynthesisGateway};

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Real-time voice chat relay: model replies in, captions and speech out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Synthesize text unit by unit and write the audio files
    Say {
        /// Text to speak
        text: String,

        /// Output directory (default: ~/.parley/audio)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration
    Check,
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };

    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

/// Config with secrets masked for display.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(model) = config.model.as_mut() {
        if model.api_key.is_some() {
            model.api_key = Some("***".into());
        }
    }
    config
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    let port = port.unwrap_or_else(|| config.gateway_port());
    let config = Arc::new(config);
    let state = GatewayState::from_config(config)?;

    #[cfg(feature = "metrics")]
    let state = state.with_metrics(parley_gateway::metrics::install_prometheus_recorder()?);

    let _ = state.synthesizer.spawn_weight_selection();

    tracing::info!(
        provider = state.provider.id(),
        model = %state.config.model_name(),
        tts = state.synthesizer.backend_id(),
        "Starting Parley relay on port {port}"
    );
    parley_gateway::start_gateway(Arc::new(state), port).await
}

async fn say(config: &Config, text: &str, out: &Path) -> anyhow::Result<()> {
    let tts = config.tts();
    let extension = tts.media_type.clone();
    let synthesizer = SynthesisGateway::new(Arc::new(SovitsBackend::new(tts)?));

    let mut segmenter = SentenceSegmenter::new(config.terminators());
    let mut units: Vec<String> = segmenter.feed(text).collect();
    units.extend(segmenter.flush());

    tokio::fs::create_dir_all(out).await?;
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");

    let mut written = 0;
    for (i, unit) in units.iter().enumerate() {
        match synthesizer.synthesize(unit).await {
            Some(audio) => {
                let path = out.join(format!("say_{ts}_{i:02}.{extension}"));
                tokio::fs::write(&path, &audio).await?;
                println!("{}  {unit}", path.display());
                written += 1;
            }
            None => println!("(no audio)  {unit}"),
        }
    }

    tracing::info!(units = units.len(), written, "Synthesis finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref());
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Serve { port } => serve(config, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&redacted(&config))?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    std::process::exit(1);
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Say { text, out } => {
            let out = out.unwrap_or_else(|| parley_core::config::data_dir().join("audio"));
            say(&config, &text, &out).await?;
        }
    }

    Ok(())
}
