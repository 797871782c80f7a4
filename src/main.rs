use clap::Parser;
use meridian::*;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "meridian", version, about = "XACML 3.0 Policy Decision Point")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Load and validate the configured policies, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    match cli.command {
        Some(Command::Check) => {
            let engine = pdp::build_engine(&settings)?;
            tracing::info!(root = engine.root_id(), "Policies valid");
            Ok(())
        }
        None => {
            let engine = pdp::build_engine(&settings)?;
            web::serve(settings, engine).await
        }
    }
}
