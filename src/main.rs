mod breakpoints;
mod config;
mod dap;
mod error;
mod mi;
mod models;
mod session;
mod utils;
mod vars;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::dap::protocol::Request;
use crate::dap::transport::read_message;
use crate::session::DebugSession;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = config::Config::default();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "dap-gdb.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        // needs to go to file, the DAP wire runs over stdio
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    info!("Starting DAP gdb server");
    debug!("config: {:?}", config);

    let (requests_tx, requests_rx) = mpsc::channel::<Request>(32);
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin());
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => match serde_json::from_value::<Request>(message) {
                    Ok(request) if request.kind == "request" => {
                        if requests_tx.send(request).await.is_err() {
                            return;
                        }
                    }
                    Ok(request) => debug!("ignoring non-request message: {}", request.kind),
                    Err(e) => warn!("undecodable client message: {}", e),
                },
                Ok(None) => return,
                Err(e) => {
                    warn!("failed to read client message: {}", e);
                    return;
                }
            }
        }
    });

    let (session, events_rx) = DebugSession::new(tokio::io::stdout(), config);
    session.run(requests_rx, events_rx).await?;
    info!("session finished");
    Ok(())
}
