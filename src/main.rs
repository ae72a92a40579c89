mod app;
mod cli;

use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG controls verbosity; default keeps the progress output clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    app::run(cli::parse());
}
