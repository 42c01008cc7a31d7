//! Serfer demo node — routes JSON-lines notifications from stdin.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Wire the router
//!   5. Spawn Ctrl-C → shutdown signal watcher
//!   6. Serve stdin until EOF or shutdown

use std::time::Duration;

use serfer::error::AppError;
use serfer::source::lines::StdioSource;
use serfer::{Router, config, logger};
use tokio_util::sync::CancellationToken;
use tracing::info;

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(run());
    // A pending stdin read cannot be cancelled; don't wait on it forever.
    runtime.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config)?;

    info!(
        node = %config.node_name,
        log_level = %config.log_level,
        buffer = config.source.buffer,
        "config loaded"
    );

    let router = wire(&config.node_name);

    // Ctrl-C cancels the token; the stdin reader stops and the loop drains.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; shutting down");
            ctrlc_token.cancel();
        }
    });

    let source = StdioSource::stdio(config.source.buffer).with_shutdown(shutdown);
    router.serve(&source).await?;
    Ok(())
}

fn wire(node_name: &str) -> Router {
    let router = Router::new();

    router.on_member_join(|_, payload| {
        info!(members = %String::from_utf8_lossy(payload), "member joined");
        Ok(())
    });
    router.on_member_leave(|_, payload| {
        info!(members = %String::from_utf8_lossy(payload), "member left");
        Ok(())
    });
    router.on_member_failed(|_, payload| {
        info!(members = %String::from_utf8_lossy(payload), "member failed");
        Ok(())
    });

    let deploy = router.sub_router("deploy/");
    let node = node_name.to_string();
    deploy.on_query("start", move |name, request| {
        info!(%name, request = %String::from_utf8_lossy(request), "deploy requested");
        Ok(format!("{node}: ok").into_bytes())
    });
    deploy.on_query("stop", |_, _| Ok(b"stopped".to_vec()));
    deploy.on_event("status", |_, payload| {
        if payload.is_empty() {
            return Err("empty status payload".into());
        }
        info!(status = %String::from_utf8_lossy(payload), "deploy status");
        Ok(())
    });

    router
}
