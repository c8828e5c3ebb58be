use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_tracing() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;

    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    setup_tracing()?;

    let args = dropin::Args::parse();

    debug!("{:?}", args);
    dropin::start(args)
}
