//! zypperpkg - Zypper package management functions
//!
//! This is the main entry point for the zypperpkg CLI.

mod cli;

use anyhow::Result;
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zypperpkg::config::Config;
use zypperpkg::connection::local::LocalConnection;
use zypperpkg::facts::Facts;
use zypperpkg::modules::{ModuleContext, ModuleRegistry};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        Config::default()
    });

    // Initialize logging based on verbosity
    init_logging(cli.verbosity(), &config.logging.level);

    if cli.verbosity() >= 2 {
        eprintln!("zypperpkg v{}", VERSION);
    }

    let output = OutputFormatter::new(
        !cli.no_color && config.colors.enabled,
        cli.output,
        cli.verbosity(),
    );

    let connection = Arc::new(LocalConnection::new());
    let facts = Facts::gather(connection.as_ref(), &config).await;

    let exit_code = match &cli.command {
        Commands::Facts => {
            let facts = serde_json::to_value(facts.all())?;
            output.result(&facts);
            0
        }
        Commands::Functions => {
            let context = ModuleContext::new(connection)
                .with_facts(facts)
                .with_config(config);
            let mut registry = ModuleRegistry::with_builtins();
            for (module, reason) in registry.load(&context).await {
                output.debug(&format!("{} not loaded: {}", module, reason));
            }
            output.list(&registry.functions());
            0
        }
        Commands::Call(call) => {
            let args = call.call_args()?;
            let context = ModuleContext::new(connection)
                .with_facts(facts)
                .with_config(config);
            let mut registry = ModuleRegistry::with_builtins();
            for (module, reason) in registry.load(&context).await {
                output.debug(&format!("{} not loaded: {}", module, reason));
            }

            debug!(function = %call.function, "Dispatching");
            match registry.call(&call.function, args, &context).await {
                Ok(value) => {
                    output.result(&value);
                    0
                }
                Err(e) => {
                    output.error(&e.to_string(), e.info());
                    e.exit_code()
                }
            }
        }
    };

    output.flush();
    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8, default_level: &str) {
    let filter = match verbosity {
        0 => default_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
