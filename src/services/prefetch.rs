// src/services/prefetch.rs
use log::{info, warn};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// How a prefetch race ended. None of these stop startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrefetchOutcome {
    Completed { bytes: usize },
    Failed { reason: String },
    TimedOut,
}

async fn fetch(client: &Client, url: &str) -> Result<usize, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let body = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(body.len())
}

/// Races one download against `timeout`.
pub async fn prefetch_with_timeout(client: &Client, url: &str, timeout: Duration) -> PrefetchOutcome {
    match tokio::time::timeout(timeout, fetch(client, url)).await {
        Ok(Ok(bytes)) => {
            info!("Prefetched {} ({} bytes)", url, bytes);
            PrefetchOutcome::Completed { bytes }
        }
        Ok(Err(reason)) => {
            warn!("Prefetch of {} failed: {}", url, reason);
            PrefetchOutcome::Failed { reason }
        }
        Err(_) => {
            warn!("Prefetch of {} timed out after {:?}", url, timeout);
            PrefetchOutcome::TimedOut
        }
    }
}

/// Prefetches every URL concurrently, each under its own timer.
pub async fn prefetch_all(client: &Client, urls: &[String], timeout: Duration) -> Vec<PrefetchOutcome> {
    futures_util::future::join_all(
        urls.iter()
            .map(|url| prefetch_with_timeout(client, url, timeout)),
    )
    .await
}
