use clap::Parser;
use cli::Cli;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries relayed data
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(cli::run(cli));
    // A stdin read may still be parked on a blocking thread
    runtime.shutdown_background();
    result
}
