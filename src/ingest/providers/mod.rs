// src/ingest/providers/mod.rs
pub mod github_trending;
pub mod hacker_news;
pub mod tldr_rss;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::CollectorsConfig;
use crate::error::FetchError;
use crate::ingest::types::{SourceCollector, GITHUB_TRENDING, HACKER_NEWS, TLDR};

pub use github_trending::GithubTrendingCollector;
pub use hacker_news::HackerNewsCollector;
pub use tldr_rss::TldrRssCollector;

const USER_AGENT: &str = concat!("trend-missions/", env!("CARGO_PKG_VERSION"));

pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(USER_AGENT)
        .build()
        .context("building http client")
}

/// GET `url` and return the body; non-2xx statuses are classified.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    source: &str,
    bearer: Option<&str>,
) -> Result<String, FetchError> {
    let mut req = client.get(url);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(source, e))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::from_status(source, status.as_u16()));
    }
    resp.text()
        .await
        .map_err(|e| FetchError::from_reqwest(source, e))
}

/// Live collectors for every name in `collectors.enabled`.
pub fn from_config(cfg: &CollectorsConfig) -> Result<Vec<Arc<dyn SourceCollector>>> {
    let client = http_client(cfg.request_timeout_secs)?;
    let mut out: Vec<Arc<dyn SourceCollector>> = Vec::with_capacity(cfg.enabled.len());
    for name in &cfg.enabled {
        match name.as_str() {
            HACKER_NEWS => out.push(Arc::new(HackerNewsCollector::from_url(
                &cfg.hacker_news_url,
                cfg.hacker_news_limit,
                client.clone(),
            ))),
            TLDR => out.push(Arc::new(TldrRssCollector::from_url(&cfg.tldr_url, client.clone()))),
            GITHUB_TRENDING => out.push(Arc::new(
                GithubTrendingCollector::from_url(&cfg.github_url, client.clone())
                    .with_limit(cfg.github_limit)
                    .with_lookback_days(cfg.github_lookback_days)
                    .with_token(std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty())),
            )),
            other => bail!("unknown collector `{other}` in collectors.enabled"),
        }
    }
    Ok(out)
}
