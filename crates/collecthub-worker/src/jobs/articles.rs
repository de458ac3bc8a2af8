//! Article page fetching for a monitored account.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing;

use collecthub_core::config::CollectorConfig;
use collecthub_core::error::{AppError, ErrorKind};
use collecthub_entity::task::{Task, TaskKind};

use crate::unit::{CollectionUnit, UnitContext, UnitError};

/// Task configuration for `collect_articles`.
#[derive(Debug, Deserialize)]
struct FetchConfig {
    account: String,
    urls: Vec<String>,
    #[serde(default)]
    max_items: Option<usize>,
}

/// Fetches a list of article URLs and reports each page as a collected item.
///
/// Content extraction is left to downstream consumers of the
/// `ItemCollected` events.
#[derive(Debug)]
pub struct ArticleFetchUnit {
    client: reqwest::Client,
    delay: Duration,
    max_items: usize,
}

impl ArticleFetchUnit {
    /// Build the unit and its HTTP client.
    pub fn new(config: &CollectorConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Configuration,
                    format!("Failed to build HTTP client: {e}"),
                    e,
                )
            })?;

        Ok(Self {
            client,
            delay: Duration::from_millis(config.delay_between_requests_ms),
            max_items: config.max_items_per_run.max(1),
        })
    }

    fn parse_config(task: &Task) -> Result<FetchConfig, UnitError> {
        let config: FetchConfig = serde_json::from_value(task.config.clone())
            .map_err(|e| UnitError::Permanent(format!("invalid collect_articles config: {e}")))?;
        if config.account.trim().is_empty() {
            return Err(UnitError::Permanent("account must not be empty".into()));
        }
        if config.urls.is_empty() {
            return Err(UnitError::Permanent(format!(
                "no urls configured for account '{}'",
                config.account
            )));
        }
        Ok(config)
    }

    async fn fetch(&self, url: &str) -> Result<(u16, usize), reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok((status, body.len()))
    }
}

#[async_trait]
impl CollectionUnit for ArticleFetchUnit {
    fn kind(&self) -> TaskKind {
        TaskKind::CollectArticles
    }

    #[tracing::instrument(skip(self, task, ctx), fields(task_id = %task.id))]
    async fn run(&self, task: &Task, ctx: &UnitContext) -> Result<Option<Value>, UnitError> {
        let config = Self::parse_config(task)?;
        let limit = config.max_items.unwrap_or(self.max_items).min(self.max_items);

        let mut collected = 0u64;
        let mut failed = 0u64;
        let mut bytes = 0u64;
        let mut last_error = None;

        for (index, url) in config.urls.iter().take(limit).enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.fetch(url).await {
                Ok((status, size)) => {
                    collected += 1;
                    bytes += size as u64;
                    ctx.item_collected(json!({
                        "account": config.account,
                        "url": url,
                        "status": status,
                        "bytes": size,
                        "fetched_at": Utc::now(),
                    }));
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        account = %config.account,
                        url = %url,
                        error = %e,
                        "Article fetch failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        if collected == 0 {
            if let Some(error) = last_error {
                return Err(UnitError::Transient(format!(
                    "all {failed} article requests for '{}' failed, last error: {error}",
                    config.account
                )));
            }
        }

        tracing::info!(
            task_id = %task.id,
            account = %config.account,
            collected,
            failed,
            "Article collection finished"
        );
        Ok(Some(json!({
            "account": config.account,
            "collected": collected,
            "failed": failed,
            "bytes": bytes,
        })))
    }
}
