use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use redmoon::{transport, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "redmoon")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("REDMOON_VERSION_SUFFIX")),
    about = "Redmoon - chat with and generate images from several AI services",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API for the web UI
    Serve {
        /// Port to listen on (default: from config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default: from config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Interactive chat and image menu
    Chat,

    /// List the configured models
    Models {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the config file, or create it with defaults
    Config {
        /// Write the default configuration
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the menu owns stdout
    let filter = if cli.verbose {
        "redmoon=debug,tower_http=debug"
    } else {
        "redmoon=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            let config = Config::load()?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            tracing::info!("Starting HTTP server on {}:{}", host, port);
            transport::http::run_http_server(&host, port, &config).await?;
        }
        Commands::Chat => {
            let config = Config::load()?;
            transport::cli::run_chat(&config).await?;
        }
        Commands::Models { format } => {
            let config = Config::load()?;
            let format = match format {
                OutputFormat::Table => "table",
                OutputFormat::Json => "json",
            };
            transport::cli::run_models(&config, format)?;
        }
        Commands::Config { init } => {
            transport::cli::run_config(init)?;
        }
    }

    Ok(())
}
