use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    serde_json::json,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    zapgate_channels::{ChatProvider, InMemoryProvider},
    zapgate_config::{ProviderKind, ZapgateConfig},
    zapgate_phone::{CandidateGenerator, NumberNormalizer},
    zapgate_whatsapp::BridgeProvider,
};

#[derive(Parser)]
#[command(name = "zapgate", about = "Zapgate: multi-tenant chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for config files in this directory.
    #[arg(long, global = true, env = "ZAPGATE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `gateway.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `gateway.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show how a number would be normalized and which candidates get probed.
    Plan { number: String },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config as TOML.
    Show,
    /// Print the path of the config file in use.
    Path,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn build_provider(config: &ZapgateConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let provider: Arc<dyn ChatProvider> = match config.provider.kind {
        ProviderKind::Bridge => Arc::new(
            BridgeProvider::new(
                config.provider.base_url.clone(),
                config.provider.api_token.clone(),
                config.provider.request_timeout(),
            )
            .context("failed to build bridge provider")?,
        ),
        ProviderKind::Memory => Arc::new(InMemoryProvider::new()),
    };
    Ok(provider)
}

/// Offline view of what resolution would probe for `number`.
fn plan_report(config: &ZapgateConfig, number: &str) -> anyhow::Result<serde_json::Value> {
    let normalized = NumberNormalizer::from_config(&config.phone).normalize(number)?;
    let candidates = CandidateGenerator::from_config(&config.phone).candidates(&normalized)?;
    Ok(json!({
        "input": number,
        "normalized": normalized,
        "candidates": candidates,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        zapgate_config::set_config_dir(dir.clone());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "zapgate starting");

    match cli.command {
        Commands::Gateway { bind, port } => {
            let mut config = zapgate_config::discover_and_load();
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let provider = build_provider(&config)?;
            zapgate_gateway::start_gateway(config, provider).await
        },
        Commands::Plan { number } => {
            let config = zapgate_config::discover_and_load();
            let report = plan_report(&config, &number)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = zapgate_config::discover_and_load();
                println!(
                    "{}",
                    toml::to_string_pretty(&config).context("failed to render config")?
                );
                Ok(())
            },
            ConfigAction::Path => {
                println!(
                    "{}",
                    zapgate_config::find_or_default_config_path().display()
                );
                Ok(())
            },
        },
    }
}
