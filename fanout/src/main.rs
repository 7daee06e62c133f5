mod config;
mod http;
mod logging;
mod signal;

use anyhow::Result;
use clap::Parser;
use fanout_sfu::{rtc::RtcEngine, Sfu};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "WebRTC selective forwarding unit", long_about = None)]
struct Args {
    /// Optional config file; environment variables take precedence
    #[arg(long, env = "FANOUT_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast)
    let config = AppConfig::load(args.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging())?;
    info!(sfu_id = %config.sfu_id, "Fanout SFU starting...");

    // 3. Build the SFU
    let engine = RtcEngine::new()?;
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let sfu = Sfu::new(config.sfu_config()?, Arc::new(engine), outbound_tx);
    let identify = sfu.identify_message();
    let stats = sfu.subscribe_stats();

    let shutdown = CancellationToken::new();

    // 4. Optional HTTP listener
    let http_task = match config.http_address().map_err(anyhow::Error::msg)? {
        Some(addr) => {
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = http::serve(addr, stats, shutdown).await {
                    error!(error = %e, "HTTP listener failed");
                }
            }))
        }
        None => {
            info!("HTTP listener disabled");
            None
        }
    };

    // 5. Dispatch loop
    let sfu_task = tokio::spawn(sfu.run(inbound_rx, shutdown.clone()));

    // 6. Signaling; the process lives as long as the connection does
    let signal_shutdown = shutdown.clone();
    let url = config.signal_server_url.clone();
    let signaling = tokio::spawn(async move {
        signal::run(&url, identify, outbound_rx, inbound_tx, signal_shutdown).await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = signaling => {
            match result {
                Ok(Ok(())) => info!("Signaling connection ended"),
                Ok(Err(e)) => error!(error = %e, "Signaling connection failed"),
                Err(e) => error!(error = %e, "Signaling task panicked"),
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = sfu_task.await {
        error!(error = %e, "SFU task panicked");
    }
    if let Some(task) = http_task {
        let _ = task.await;
    }

    info!("Fanout SFU stopped");
    Ok(())
}
