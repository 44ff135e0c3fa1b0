use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter);

    let settings = config::Settings::load(&args.config)?;
    settings.validate()?;

    let shutdown_signal = CancellationToken::new();
    let shutdown_on_ctrl_c = shutdown_signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_on_ctrl_c.cancel();
        }
    });

    server::serve(server::ServeConfig {
        settings,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
    .await
}
