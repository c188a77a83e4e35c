use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use faq_chat::api::{self, AppState};
use faq_chat::chat::ChatEngineFactory;
use faq_chat::config::Settings;
use faq_chat::config::settings::CONFIG_FILE_NAME;
use faq_chat::etl::extract_transform_load;
use faq_chat::openai::OpenAiClient;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faq-chat")]
#[command(about = "FAQ chatbot: builds the FAQ vector collection and streams answers over SSE")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml; relative data paths resolve against it
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the collection if needed, then serve the HTTP API (default)
    Serve,
    /// Build the collection from the raw FAQ data and exit
    Ingest,
    /// Inspect configuration
    Config {
        /// Show the effective configuration with secrets masked
        #[arg(long)]
        show: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    let settings = Settings::load(&cli.config_dir).with_context(|| {
        format!(
            "Failed to load settings from {}",
            cli.config_dir.join(CONFIG_FILE_NAME).display()
        )
    })?;
    init_tracing(&settings.log_level);

    if let Commands::Config { show } = command {
        return show_config(&settings, &cli.config_dir, show);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_count())
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    match command {
        Commands::Ingest => runtime.block_on(ingest(&settings)),
        Commands::Serve | Commands::Config { .. } => runtime.block_on(serve(settings)),
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn show_config(settings: &Settings, config_dir: &Path, show: bool) -> anyhow::Result<()> {
    if !show {
        println!(
            "Configuration is read from {} and environment variables.",
            config_dir.join(CONFIG_FILE_NAME).display()
        );
        println!("Run 'faq-chat config --show' to print the effective settings.");
        return Ok(());
    }

    println!("Environment: {}", settings.environment());
    println!("Raw data: {}", settings.raw_data_path().display());
    println!("Vector database: {}", settings.vector_db_path().display());
    println!();
    print!("{}", settings.redacted().to_toml()?);
    Ok(())
}

async fn ingest(settings: &Settings) -> anyhow::Result<()> {
    let client = OpenAiClient::new(&settings.openai)?;
    let outcome = extract_transform_load(settings, &client)
        .await
        .context("Failed to build the FAQ collection")?;

    println!("✅ ETL {}", outcome);
    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    println!("Environment: {}", settings.environment());

    let client = OpenAiClient::new(&settings.openai)?;
    let outcome = extract_transform_load(&settings, &client)
        .await
        .context("Failed to build the FAQ collection")?;
    info!("ETL {}", outcome);

    let settings = Arc::new(settings);
    let factory = ChatEngineFactory::with_openai(Arc::clone(&settings), client);
    let listener = TcpListener::bind(settings.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address()))?;

    api::serve(
        listener,
        AppState::new(Arc::new(factory)),
        &settings.server.api_prefix,
    )
    .await?;

    println!("✅ Shutdown complete");
    Ok(())
}
