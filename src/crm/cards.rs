//! Pipelines/cards data source.
//!
//! The CRM exposes `GET /pipelines/cards` (paginated listing filtered by
//! pipeline/status) and `GET /pipelines/cards/{id}` (full detail). Response
//! envelopes vary across CRM versions: listings arrive as a bare array or
//! wrapped under `data`/`items`/`result`, with pagination signalled by
//! `meta.current_page`/`meta.last_page` or a `links.next`/`next_page_url`
//! link. The parsing here tolerates all of them.

use async_trait::async_trait;
use serde_json::Value;

use super::{send_with_retry, CrmError, RetryPolicy};
use crate::config::CrmConfig;

/// One page of a card listing, with whatever pagination hints the envelope
/// carried.
#[derive(Debug, Clone, Default)]
pub struct CardPage {
    pub items: Vec<Value>,
    pub current_page: Option<u64>,
    pub last_page: Option<u64>,
    pub next: Option<String>,
}

impl CardPage {
    /// Whether another page should be requested after this one.
    ///
    /// Preference order: explicit current/last page counters, then a `next`
    /// link, then the full-page heuristic (a page with exactly `per_page`
    /// items is assumed not to be the last).
    pub fn has_more(&self, per_page: usize) -> bool {
        if let (Some(current), Some(last)) = (self.current_page, self.last_page) {
            return current < last;
        }
        if self.next.is_some() {
            return true;
        }
        self.items.len() == per_page
    }
}

/// Card Data Source port: list cards by (pipeline, status) and fetch one
/// card's full detail.
#[async_trait]
pub trait CardSource: Send + Sync {
    async fn list_page(
        &self,
        pipeline_id: &str,
        status_id: &str,
        page: u64,
        per_page: usize,
    ) -> Result<CardPage, CrmError>;

    async fn card_detail(&self, card_id: &str) -> Result<Value, CrmError>;
}

// ---------------------------------------------------------------------------
// Envelope helpers
// ---------------------------------------------------------------------------

/// Pull the item list out of a listing response, whatever its wrapping.
fn parse_list_envelope(body: Value) -> Result<CardPage, CrmError> {
    if let Value::Array(items) = body {
        return Ok(CardPage {
            items,
            ..Default::default()
        });
    }

    let items = ["data", "items", "result"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array).cloned())
        .ok_or_else(|| {
            CrmError::Envelope("listing response has no data/items/result array".to_string())
        })?;

    let meta = body.get("meta");
    let current_page = meta
        .and_then(|m| m.get("current_page"))
        .and_then(Value::as_u64);
    let last_page = meta
        .and_then(|m| m.get("last_page"))
        .and_then(Value::as_u64);
    let next = body
        .get("links")
        .and_then(|l| l.get("next"))
        .or_else(|| body.get("next_page_url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CardPage {
        items,
        current_page,
        last_page,
        next,
    })
}

/// Extract a card's id from a listing item; ids arrive as numbers or strings.
pub fn card_id_of(card: &Value) -> Option<String> {
    match card.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Read a card detail's live (pipeline_id, status_id): the nested `status`
/// object is authoritative, flat fields are the fallback.
pub fn live_location(card: &Value) -> (Option<String>, Option<String>) {
    let status = card.get("status");
    let pipeline_id = status
        .and_then(|s| s.get("pipeline_id"))
        .or_else(|| card.get("pipeline_id"))
        .and_then(id_string);
    let status_id = status
        .and_then(|s| s.get("id"))
        .or_else(|| card.get("status_id"))
        .and_then(id_string);
    (pipeline_id, status_id)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Reqwest-backed CRM client.
pub struct KeyCrmClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl KeyCrmClient {
    pub fn new(config: &CrmConfig) -> Self {
        Self {
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    async fn get_json(&self, url: String, query: &[(&str, String)]) -> Result<Value, CrmError> {
        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query);

        let resp = send_with_retry(request, &self.retry).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl CardSource for KeyCrmClient {
    async fn list_page(
        &self,
        pipeline_id: &str,
        status_id: &str,
        page: u64,
        per_page: usize,
    ) -> Result<CardPage, CrmError> {
        let body = self
            .get_json(
                format!("{}/pipelines/cards", self.base_url),
                &[
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                    ("pipeline_id", pipeline_id.to_string()),
                    ("status_id", status_id.to_string()),
                ],
            )
            .await?;
        let parsed = parse_list_envelope(body)?;
        log::debug!(
            "cards list page {}: {} items (current={:?} last={:?} next={})",
            page,
            parsed.items.len(),
            parsed.current_page,
            parsed.last_page,
            parsed.next.is_some()
        );
        Ok(parsed)
    }

    async fn card_detail(&self, card_id: &str) -> Result<Value, CrmError> {
        let body = self
            .get_json(format!("{}/pipelines/cards/{}", self.base_url, card_id), &[])
            .await?;
        // Detail may arrive bare or wrapped in {data: <card>}
        match body.get("data") {
            Some(inner) if inner.is_object() => Ok(inner.clone()),
            _ => Ok(body),
        }
    }
}
