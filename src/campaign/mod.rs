//! Campaign expiration engine.
//!
//! A campaign tracks the cohort of CRM cards sitting in its base
//! (pipeline, status) pair. The collector snapshots the cohort with each
//! card's entry timestamp; the evaluator later reports cards older than the
//! campaign's day TTL, after re-verifying their live location; the cache
//! hook subtracts cards the moment upstream reports they left the base pair.
//!
//! Modules:
//! - resolver: tolerant multi-shape campaign field resolution (pure)
//! - collector: cohort listing + detail capture, full snapshot rebuild
//! - evaluator: TTL threshold math + fail-closed live verification
//! - cache: snapshot load/save and the subtractive mutation hook

pub mod cache;
pub mod collector;
pub mod evaluator;
pub mod resolver;

use serde::{Deserialize, Serialize};

/// Snapshot store key for a campaign's cohort blob.
pub fn snapshot_key(campaign_id: &str) -> String {
    format!("cmp:base-entered:{}", campaign_id)
}

/// A (pipeline, status) coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasePair {
    pub pipeline_id: String,
    pub status_id: String,
}

/// A campaign's fully-resolved expiration settings. Only produced when the
/// base pair, the target pair, and a positive day TTL all resolved —
/// partially-configured campaigns never expire cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationConfig {
    pub base_pipeline_id: String,
    pub base_status_id: String,
    pub target_pipeline_id: String,
    pub target_status_id: String,
    pub days: f64,
}

impl ExpirationConfig {
    pub fn base_pair(&self) -> BasePair {
        BasePair {
            pipeline_id: self.base_pipeline_id.clone(),
            status_id: self.base_status_id.clone(),
        }
    }

    pub fn target_pair(&self) -> BasePair {
        BasePair {
            pipeline_id: self.target_pipeline_id.clone(),
            status_id: self.target_status_id.clone(),
        }
    }
}

/// One tracked card inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEnteredCard {
    pub card_id: String,
    /// Last known location; detail fetches may omit it.
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
    /// Entry instant in epoch ms; None when no parseable timestamp was found.
    #[serde(default)]
    pub entered_at: Option<i64>,
    /// The unparsed field value, kept for diagnostics.
    #[serde(default)]
    pub entered_at_raw: Option<String>,
    /// When this row was captured, epoch ms.
    pub fetched_at: i64,
}

/// The persisted per-campaign cohort snapshot. Always written whole: a full
/// rebuild by the collector or a subtractive edit by the mutation hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEnteredCache {
    pub campaign_id: String,
    pub pipeline_id: String,
    pub status_id: String,
    pub updated_at: i64,
    pub cards: Vec<BaseEnteredCard>,
}

/// A per-card detail fetch failure from one collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardFetchError {
    pub card_id: String,
    pub error: String,
}

/// Transient report of one collection run; returned to the caller as JSON,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    /// Raw count of ids seen in the listing phase.
    #[serde(default)]
    pub listed: usize,
    /// Detail fetches that succeeded; failures land in `errors` instead.
    #[serde(default)]
    pub detail_fetched: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub cards: Vec<BaseEnteredCard>,
    #[serde(default)]
    pub errors: Vec<CardFetchError>,
}

impl CollectReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            pipeline_id: None,
            status_id: None,
            listed: 0,
            detail_fetched: 0,
            updated_at: None,
            cards: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Report of one expiration evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ExpirationConfig>,
    /// The cutoff instant: cards entered at or before it are expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i64>,
    /// All snapshot cards past the threshold.
    #[serde(default)]
    pub expired: Vec<String>,
    /// Expired cards whose live location still equals the base pair; these
    /// are safe to move to the target pair.
    #[serde(default)]
    pub confirmed: Vec<String>,
    /// Expired cards that failed live verification; left for the next full
    /// collection to reconcile.
    #[serde(default)]
    pub unconfirmed: Vec<String>,
    /// Snapshot rows with no parseable entry timestamp.
    #[serde(default)]
    pub missing_entered_at: usize,
}

impl ExpireReport {
    pub fn failed(campaign_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            campaign_id,
            config: None,
            threshold: None,
            expired: Vec::new(),
            confirmed: Vec::new(),
            unconfirmed: Vec::new(),
            missing_entered_at: 0,
        }
    }
}
