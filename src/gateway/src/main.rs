use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod service;

use service::{build_router, LiveUpstream, DEFAULT_SYSTEM_PROMPT};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let bind = parse_socket("BEREA_GATEWAY_BIND", ([127, 0, 0, 1], 8787).into());
    let upstream_url =
        env::var("BEREA_UPSTREAM_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
    let upstream_key = env::var("BEREA_UPSTREAM_KEY").unwrap_or_default();
    let model = env::var("BEREA_UPSTREAM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let system_prompt =
        env::var("BEREA_SYSTEM_PROMPT").unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());
    let timeout = parse_duration("BEREA_UPSTREAM_TIMEOUT_SECS", Duration::from_secs(60));

    let upstream = LiveUpstream::new(&upstream_url, upstream_key, model, system_prompt, timeout)?;
    let app = build_router(Arc::new(upstream));

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map(Duration::from_secs).unwrap_or(default),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("BEREA_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("BEREA_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
