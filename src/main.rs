#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use florentine::agent::compose_system_prompt;
use florentine::sessions::Session;
use florentine::{gateway, providers, Config};

/// `Florentine` - narrative game master for 15th-century Florence.
#[derive(Parser, Debug)]
#[command(name = "florentine")]
#[command(version)]
#[command(about = "Streaming LLM game master for the Florence narrative game.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (default: ~/.florentine)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway for the browser client
    #[command(long_about = "\
Start the HTTP gateway for the browser client.

Serves the streaming /chat endpoint, game event endpoints and, when \
gateway.static_dir is set, the browser client itself. Bind address \
defaults to the values in your config file (gateway.host / gateway.port).

Examples:
  florentine gateway                  # use config defaults
  florentine gateway -p 8080          # listen on port 8080
  florentine gateway --host 0.0.0.0   # bind to all interfaces")]
    Gateway {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Show resolved configuration
    Status,

    /// List supported AI providers
    Providers,

    /// Print the game-master system prompt for a new session
    Prompt,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install log subscriber: {e}");
    }

    run(cli).await
}

/// Execute one parsed command. Only commands that need settings load the
/// config file.
async fn run(cli: Cli) -> Result<()> {
    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Prompt => {
            println!("{}", compose_system_prompt(&Session::default()));
            Ok(())
        }

        Commands::Gateway { port, host } => {
            let mut config = Config::load_or_init(config_dir).await?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            config.validate()?;
            if config.gateway.port == 0 {
                info!("Starting Florentine gateway on {} (random port)", config.gateway.host);
            } else {
                info!(
                    "Starting Florentine gateway on {}:{}",
                    config.gateway.host, config.gateway.port
                );
            }
            gateway::run_gateway(config).await
        }

        Commands::Status => {
            let config = Config::load_or_init(config_dir).await?;
            print_status(&config);
            Ok(())
        }

        Commands::Providers => {
            let config = Config::load_or_init(config_dir).await?;
            print_providers(&config.default_provider);
            Ok(())
        }
    }
}

fn print_status(config: &Config) {
    println!("Florentine Status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Config:      {}", config.config_path.display());
    println!();
    println!("Provider:    {}", config.default_provider);
    println!("Model:       {}", config.default_model);
    println!("Temperature: {}", config.default_temperature);
    println!("API key:     {}", config.masked_api_key());
    println!(
        "API URL:     {}",
        config.api_url.as_deref().unwrap_or("(provider default)")
    );
    println!();
    println!("Gateway:");
    println!("  Listen:         {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "  Static client:  {}",
        config
            .gateway
            .resolved_static_dir()
            .map_or_else(|| "(disabled)".to_string(), |dir| dir.display().to_string())
    );
    println!("  Max body:       {} bytes", config.gateway.max_body_bytes);
    println!("  Request limit:  {}s", config.gateway.request_timeout_secs);
    println!();
    println!("Streaming:");
    println!(
        "  First fragment: {}s",
        config.stream.first_fragment_timeout_secs
    );
    println!("  Whole reply:    {}s", config.stream.total_timeout_secs);
    println!("  Buffer:         {} fragments", config.stream.channel_capacity);
    println!();
    println!("Events:");
    println!(
        "  Random event temperature: {}",
        config.events.random_event_temperature
    );
    println!(
        "  Event choice temperature: {}",
        config.events.event_choice_temperature
    );
}

fn print_providers(active: &str) {
    let providers = providers::list_providers();
    let current = active.trim().to_ascii_lowercase();
    println!("Supported providers ({} total):\n", providers.len());
    println!("  ID (use in config)  DESCRIPTION");
    println!("  ------------------- -----------");
    for p in &providers {
        let is_active = p.name.eq_ignore_ascii_case(&current)
            || p.aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(&current));
        let marker = if is_active { " (active)" } else { "" };
        let aliases = if p.aliases.is_empty() {
            String::new()
        } else {
            format!("  (aliases: {})", p.aliases.join(", "))
        };
        println!(
            "  {:<19} {} <{}>{}{}",
            p.name, p.display_name, p.base_url, marker, aliases
        );
    }
    println!("\n  custom:<URL>   Any OpenAI-compatible endpoint");
}
