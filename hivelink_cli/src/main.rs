//! Command-line entry point for Hivelink.

mod metrics;
mod serve;
mod watch;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(version, about = "Hivelink long-poll backend")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the long-poll server.
    Serve(serve::ServeArgs),

    /// Subscribe to a server and print received events.
    Watch(watch::WatchArgs),
}

#[tokio::main(flavor = "multi_thread", worker_threads = 10)]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let token = CancellationToken::new();
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let token = token.clone();
        let hits = hits.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_ok() {
                    match hits.fetch_add(1, Ordering::Relaxed) {
                        0 => {
                            eprintln!(
                                "Ctrl+C — attempting graceful shutdown… (press again to force)"
                            );
                            token.cancel();
                        }
                        _ => {
                            eprintln!("Force exiting.");
                            std::process::exit(130);
                        }
                    }
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let t = token.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                eprintln!("SIGTERM — graceful shutdown…");
                t.cancel();
            }
        });
    }

    let args = Arguments::parse();
    match args.command {
        Command::Serve(serve_args) => serve::run(serve_args, token).await,
        Command::Watch(watch_args) => watch::run(watch_args, token).await,
    }
}
