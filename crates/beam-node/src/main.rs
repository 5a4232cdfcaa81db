mod config;
mod sink;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beam_gateway::{Dispatcher, Downloader, WsConnector, router};
use beam_transfer::{ConnectionStatus, SourceFile, TracingLogger, TransferProgress};
use beam_types::{PeerId, share_link};
use clap::{Parser, Subcommand};
use tracing::info;
use url::Url;

use crate::config::NodeConfig;
use crate::sink::DirectorySink;

/// Send a file straight to another machine over a shareable link.
#[derive(Parser)]
#[command(name = "beam", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Offer a file and print the link to fetch it with
    Serve {
        file: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short)]
        port: Option<u16>,
        /// Base URL peers reach this node at
        #[arg(long)]
        public_url: Option<Url>,
    },
    /// Download the file behind a share link
    Fetch {
        link: String,
        /// Directory to save into
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beam=info,beam_gateway=info,beam_transfer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = NodeConfig::from_env()?;

    match cli.command {
        Command::Serve {
            file,
            host,
            port,
            public_url,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if public_url.is_some() {
                config.public_url = public_url;
            }
            serve(config, file).await
        }
        Command::Fetch { link, out } => {
            if let Some(out) = out {
                config.output_dir = out;
            }
            fetch(config, &link).await
        }
    }
}

async fn serve(config: NodeConfig, file: PathBuf) -> anyhow::Result<()> {
    let source = SourceFile::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let dispatcher = Dispatcher::new(
        PeerId::generate(),
        config.transfer.clone(),
        Arc::new(TracingLogger),
    );
    dispatcher.load_file(source).await;

    let link = share_link(&config.link_base()?, dispatcher.local_id());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("beam serving on {}", addr);
    println!("{link}");

    tokio::spawn(report_connections(dispatcher.clone()));
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn report_connections(dispatcher: Dispatcher) {
    let mut seen: HashMap<PeerId, ConnectionStatus> = HashMap::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        for record in dispatcher.connections().await {
            if seen.insert(record.peer(), record.status()) == Some(record.status()) {
                continue;
            }
            info!(
                peer = %record.peer(),
                status = %record.status(),
                bytes_sent = record.bytes_sent(),
                "client status changed"
            );
        }
    }
}

async fn fetch(config: NodeConfig, link: &str) -> anyhow::Result<()> {
    let (mut connector, target) =
        WsConnector::from_link(link, PeerId::generate()).context("invalid share link")?;
    let mut sink = DirectorySink::new(&config.output_dir);
    let progress = Arc::new(TransferProgress::new());

    let reporter = tokio::spawn(report_progress(progress.clone()));
    let result = Downloader::new(target, config.transfer.clone())
        .with_progress(progress)
        .with_logger(Arc::new(TracingLogger))
        .run(&mut connector, &mut sink)
        .await;
    reporter.abort();

    let report = result?;
    info!(
        name = %report.metadata.name,
        bytes = report.metadata.size,
        elapsed_ms = report.elapsed_ms,
        throughput_bps = report.throughput_bps,
        rounds = report.rounds,
        reconnects = report.reconnects,
        "download complete"
    );
    for path in sink.written() {
        println!("{}", path.display());
    }
    Ok(())
}

async fn report_progress(progress: Arc<TransferProgress>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let snapshot = progress.snapshot();
        if snapshot.total_bytes > 0 {
            info!(
                "{:.1}% ({} / {} bytes)",
                snapshot.fraction() * 100.0,
                snapshot.received_bytes,
                snapshot.total_bytes
            );
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
