//! External collaborators: the paginated catalog search API and the
//! notification delivery channel.

use std::time::Duration;

use async_trait::async_trait;
use oct_core::ProductDraft;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "oct-adapters";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog responded {status} for page {page}")]
    Status { status: u16, page: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Capped exponential backoff for retrying a single page request.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Inter-request pacing for the paged listing fetch. A first-class value so
/// callers can tune or zero it, not inline control flow.
#[derive(Debug, Clone, Copy)]
pub struct PacingPolicy {
    pub page_delay: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Origin the search endpoint and product links hang off.
    pub base_url: String,
    /// Path of the search endpoint itself.
    pub search_path: String,
    /// Listing path sent in the request body.
    pub listing_path: String,
    pub filter: Vec<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub pacing: PacingPolicy,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    path: &'a str,
    filter: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

/// Response envelope of the catalog search API. Everything is defaulted so a
/// page with missing optional fields still decodes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub paging: Option<Paging>,
    #[serde(default)]
    pub total_hits: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// One raw listing record as returned upstream. Unknown fields are ignored
/// and missing ones default; malformed data is tolerated, not rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<RawPrice>,
    #[serde(default)]
    pub a_price: Vec<f64>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub b_grade: Option<bool>,
    #[serde(default)]
    pub bullet_points: Vec<String>,
    #[serde(default)]
    pub taxonomy: Vec<String>,
    #[serde(default)]
    pub store_stock: Option<serde_json::Value>,
    #[serde(default)]
    pub sellability: Option<RawSellability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrice {
    #[serde(default)]
    pub current: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSellability {
    #[serde(default)]
    pub is_buyable_online: Option<bool>,
}

/// Map one raw record into a canonical draft.
///
/// Returns `None` only when the record carries no sku, since reconciliation
/// is keyed on it. The outlet price is the first current price entry; the
/// original price falls back to the outlet price when no list price exists.
pub fn normalize(record: RawRecord) -> Option<ProductDraft> {
    let sku = record.sku.filter(|sku| !sku.is_empty())?;
    let outlet_price = record
        .price
        .as_ref()
        .and_then(|price| price.current.first().copied());
    let original_price = record.a_price.first().copied().or(outlet_price);
    Some(ProductDraft {
        sku,
        name: record.name.unwrap_or_default(),
        brand: record.brand.unwrap_or_default(),
        outlet_price,
        original_price,
        href: record.href.unwrap_or_default(),
        image_url: record.image_url.unwrap_or_default(),
        b_grade: record.b_grade.unwrap_or(false),
        bullet_points: record.bullet_points,
        category: record.taxonomy.into_iter().next().unwrap_or_default(),
        store_stock: record.store_stock,
        buyable_online: record
            .sellability
            .and_then(|sellability| sellability.is_buyable_online)
            .unwrap_or(false),
    })
}

/// One successfully decoded listing page.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub records: Vec<RawRecord>,
    pub page_count: u32,
    pub total_hits: u64,
}

/// A page that failed after retries and was skipped.
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub page: u32,
    pub error: String,
}

/// The concatenated result of one full listing retrieval.
#[derive(Debug, Clone, Default)]
pub struct ListingBatch {
    pub records: Vec<ProductDraft>,
    pub page_failures: Vec<PageFailure>,
    pub total_hits: u64,
}

/// Seam between the sync pipeline and the external listing retrieval.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Retrieve the full listing. A page-1 failure is fatal; failures on
    /// later pages degrade to `page_failures` entries.
    async fn fetch_all(&self) -> Result<ListingBatch, FetchError>;
}

/// Client for the paginated catalog search API.
#[derive(Debug)]
pub struct CatalogClient {
    client: reqwest::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch and decode one listing page, retrying transient failures.
    pub async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError> {
        let url = format!("{}{}", self.config.base_url, self.config.search_path);
        let body = SearchRequest {
            path: &self.config.listing_path,
            filter: &self.config.filter,
            page: (page > 1).then_some(page),
        };

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.config.backoff.max_retries {
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: SearchResponse = resp.json().await?;
                        return Ok(CatalogPage {
                            records: parsed.records,
                            page_count: parsed
                                .paging
                                .and_then(|paging| paging.page_count)
                                .unwrap_or(1)
                                .max(1),
                            total_hits: parsed.total_hits.unwrap_or(0),
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        page,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Http(err));
                }
            }
        }

        Err(FetchError::Http(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[async_trait]
impl ListingSource for CatalogClient {
    async fn fetch_all(&self) -> Result<ListingBatch, FetchError> {
        let first = self.fetch_page(1).await?;
        let page_count = first.page_count;
        let total_hits = first.total_hits;
        info!(page_count, total_hits, "catalog listing discovered");

        let mut records = Vec::new();
        let mut dropped = 0usize;
        collect_drafts(first.records, &mut records, &mut dropped);

        let mut page_failures = Vec::new();
        for page in 2..=page_count {
            tokio::time::sleep(self.config.pacing.page_delay).await;
            match self.fetch_page(page).await {
                Ok(listing_page) => {
                    collect_drafts(listing_page.records, &mut records, &mut dropped);
                    if page % 10 == 0 {
                        info!(page, page_count, fetched = records.len(), "listing fetch progress");
                    }
                }
                Err(err) => {
                    warn!(page, error = %err, "skipping listing page");
                    page_failures.push(PageFailure {
                        page,
                        error: err.to_string(),
                    });
                }
            }
        }

        if dropped > 0 {
            debug!(dropped, "dropped records without a sku");
        }
        info!(
            records = records.len(),
            failed_pages = page_failures.len(),
            "catalog listing fetch complete"
        );

        Ok(ListingBatch {
            records,
            page_failures,
            total_hits,
        })
    }
}

fn collect_drafts(raw: Vec<RawRecord>, out: &mut Vec<ProductDraft>, dropped: &mut usize) {
    for record in raw {
        match normalize(record) {
            Some(draft) => out.push(draft),
            None => *dropped += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery endpoint responded {status}")]
    Status { status: u16 },
}

/// External notification capability: one message to one address.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Mail-gateway configuration. `None` when no endpoint is configured, which
/// downgrades dispatch to a logged no-op.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub endpoint: String,
    pub from: String,
    pub timeout: Duration,
}

impl MailerConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("OCT_MAIL_ENDPOINT").ok()?;
        Some(Self {
            endpoint,
            from: std::env::var("OCT_MAIL_FROM")
                .unwrap_or_else(|_| "outlet-tracker@localhost".to_string()),
            timeout: Duration::from_secs(10),
        })
    }
}

/// Delivery client posting JSON messages to a configured mail gateway.
/// Constructed explicitly and handed to the dispatcher, never ambient state.
#[derive(Debug)]
pub struct WebhookMailer {
    client: reqwest::Client,
    config: MailerConfig,
}

impl WebhookMailer {
    pub fn new(config: MailerConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DeliveryChannel for WebhookMailer {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let payload = serde_json::json!({
            "from": self.config.from,
            "to": address,
            "subject": subject,
            "body": body,
        });
        let resp = self
            .client
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }
        debug!(address, "notification delivered");
        Ok(())
    }
}
