use anyhow::{Context, Result};
use spectre::app::App;
use spectre::config::Config;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) -> Result<()> {
    let default_filter = if config.debug {
        "spectre=debug"
    } else {
        "spectre=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    init_tracing(&config)?;

    let mut app = App::new(config);
    if let Err(error) = app.connect().await {
        eprintln!("Failed to connect to the chat server: {error}");
        eprintln!("Check that it is running and that LLAMA_HOST_URI points at it.");
        std::process::exit(1);
    }

    app.run().await
}
