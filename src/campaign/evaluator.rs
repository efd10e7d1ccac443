//! Expiration evaluation.
//!
//! Given a snapshot and the current time, decide which cards have outlived
//! the campaign's day TTL. The snapshot can be stale — a card may already
//! have been moved out of the base pair by an operator or another webhook —
//! so every expired card is re-verified against its live location before it
//! is reported as safe to move. Verification fails closed: any fetch error
//! means "not confirmed", never a hard failure.

use serde_json::Value;

use crate::crm::cards::live_location;
use crate::crm::CardSource;
use crate::store::SnapshotStore;

use super::cache::load_cache;
use super::collector::campaign_id_of;
use super::resolver::resolve_expiration_config;
use super::{BaseEnteredCache, BaseEnteredCard, BasePair, ExpirationConfig, ExpireReport};

const DAY_MS: f64 = 86_400_000.0;

/// The cutoff instant for a config at `now`: cards entered at or before it
/// are expired.
pub fn threshold_for(config: &ExpirationConfig, now: i64) -> i64 {
    now - (config.days * DAY_MS) as i64
}

/// Snapshot rows past the threshold. Inclusive: `entered_at == threshold`
/// is expired. Rows without a parsed timestamp never expire.
pub fn expired_cards<'a>(cache: &'a BaseEnteredCache, threshold: i64) -> Vec<&'a BaseEnteredCard> {
    cache
        .cards
        .iter()
        .filter(|card| matches!(card.entered_at, Some(t) if t <= threshold))
        .collect()
}

/// Confirm a card is still sitting in the base pair right now.
///
/// Fail-closed: a fetch error, a missing location field, or a mismatch all
/// yield `false`. Never acts on unverifiable state, never propagates.
pub async fn ensure_card_still_in_base(
    source: &dyn CardSource,
    card_id: &str,
    base: &BasePair,
) -> bool {
    match source.card_detail(card_id).await {
        Ok(detail) => {
            let (pipeline_id, status_id) = live_location(&detail);
            pipeline_id.as_deref() == Some(base.pipeline_id.as_str())
                && status_id.as_deref() == Some(base.status_id.as_str())
        }
        Err(e) => {
            log::warn!(
                "card {} live verification failed, treating as not confirmed: {}",
                card_id,
                e
            );
            false
        }
    }
}

/// Evaluate one campaign: resolve its config, read its snapshot, partition
/// expired cards into confirmed (still in the base pair, safe to move) and
/// unconfirmed (left for the next collection to reconcile).
pub async fn evaluate_campaign(
    campaign: &Value,
    source: &dyn CardSource,
    store: &dyn SnapshotStore,
    now: i64,
) -> ExpireReport {
    let Some(campaign_id) = campaign_id_of(campaign) else {
        return ExpireReport::failed(None, "campaign_id_missing");
    };

    let Some(config) = resolve_expiration_config(campaign) else {
        return ExpireReport::failed(Some(campaign_id), "expiration_not_configured");
    };

    let cache = match load_cache(store, &campaign_id) {
        Ok(Some(cache)) => cache,
        Ok(None) => return ExpireReport::failed(Some(campaign_id), "cache_missing"),
        Err(e) => return ExpireReport::failed(Some(campaign_id), e.to_string()),
    };

    let threshold = threshold_for(&config, now);
    let expired = expired_cards(&cache, threshold);
    let missing_entered_at = cache
        .cards
        .iter()
        .filter(|card| card.entered_at.is_none())
        .count();

    let base = config.base_pair();
    let mut confirmed = Vec::new();
    let mut unconfirmed = Vec::new();
    for card in &expired {
        if ensure_card_still_in_base(source, &card.card_id, &base).await {
            confirmed.push(card.card_id.clone());
        } else {
            unconfirmed.push(card.card_id.clone());
        }
    }

    log::info!(
        "campaign {}: {} expired of {} tracked ({} confirmed, {} unconfirmed, {} without entry ts)",
        campaign_id,
        expired.len(),
        cache.cards.len(),
        confirmed.len(),
        unconfirmed.len(),
        missing_entered_at
    );

    ExpireReport {
        ok: true,
        message: None,
        campaign_id: Some(campaign_id),
        config: Some(config),
        threshold: Some(threshold),
        expired: expired.iter().map(|card| card.card_id.clone()).collect(),
        confirmed,
        unconfirmed,
        missing_entered_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::cache::save_cache;
    use crate::crm::{CardPage, CrmError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Detail-only source: per-card live locations, with failure injection.
    struct LiveSource {
        locations: std::collections::HashMap<String, (String, String)>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl CardSource for LiveSource {
        async fn list_page(
            &self,
            _pipeline_id: &str,
            _status_id: &str,
            _page: u64,
            _per_page: usize,
        ) -> Result<CardPage, CrmError> {
            unreachable!("evaluation never lists")
        }

        async fn card_detail(&self, card_id: &str) -> Result<Value, CrmError> {
            if self.failing.iter().any(|id| id == card_id) {
                return Err(CrmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            let (pipeline, status) = self
                .locations
                .get(card_id)
                .cloned()
                .unwrap_or(("0".to_string(), "0".to_string()));
            Ok(json!({"status": {"pipeline_id": pipeline, "id": status}}))
        }
    }

    fn config() -> ExpirationConfig {
        ExpirationConfig {
            base_pipeline_id: "1".to_string(),
            base_status_id: "38".to_string(),
            target_pipeline_id: "2".to_string(),
            target_status_id: "40".to_string(),
            days: 4.0,
        }
    }

    fn row(id: &str, entered_at: Option<i64>) -> BaseEnteredCard {
        BaseEnteredCard {
            card_id: id.to_string(),
            pipeline_id: Some("1".to_string()),
            status_id: Some("38".to_string()),
            entered_at,
            entered_at_raw: entered_at.map(|t| t.to_string()),
            fetched_at: 0,
        }
    }

    fn cache_with(cards: Vec<BaseEnteredCard>) -> BaseEnteredCache {
        BaseEnteredCache {
            campaign_id: "c1".to_string(),
            pipeline_id: "1".to_string(),
            status_id: "38".to_string(),
            updated_at: 0,
            cards,
        }
    }

    #[test]
    fn threshold_is_days_in_ms_before_now() {
        let now = 1_700_000_000_000;
        assert_eq!(threshold_for(&config(), now), now - 4 * 86_400_000);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let threshold = 1_000_000;
        let cache = cache_with(vec![
            row("at", Some(threshold)),
            row("after", Some(threshold + 1)),
            row("before", Some(threshold - 1)),
            row("unknown", None),
        ]);
        let ids: Vec<&str> = expired_cards(&cache, threshold)
            .iter()
            .map(|card| card.card_id.as_str())
            .collect();
        assert_eq!(ids, vec!["at", "before"]);
    }

    #[tokio::test]
    async fn verification_matches_base_pair() {
        let source = LiveSource {
            locations: [("7".to_string(), ("1".to_string(), "38".to_string()))]
                .into_iter()
                .collect(),
            failing: Vec::new(),
        };
        let base = config().base_pair();
        assert!(ensure_card_still_in_base(&source, "7", &base).await);
        // Unknown card resolves to a different location
        assert!(!ensure_card_still_in_base(&source, "8", &base).await);
    }

    #[tokio::test]
    async fn verification_fails_closed_on_fetch_error() {
        let source = LiveSource {
            locations: std::collections::HashMap::new(),
            failing: vec!["7".to_string()],
        };
        assert!(!ensure_card_still_in_base(&source, "7", &config().base_pair()).await);
    }

    fn campaign() -> Value {
        json!({
            "id": "c1",
            "base": {"pipeline": "1", "status": "38"},
            "texp": {"pipeline": "2", "status": "40"},
            "expDays": 4
        })
    }

    #[tokio::test]
    async fn evaluation_partitions_confirmed_and_unconfirmed() {
        let now: i64 = 1_700_000_000_000;
        let old = now - 5 * 86_400_000;
        let store = MemoryStore::new();
        save_cache(
            &store,
            &cache_with(vec![
                row("still-there", Some(old)),
                row("moved-away", Some(old)),
                row("fresh", Some(now - 86_400_000)),
            ]),
        )
        .unwrap();

        let source = LiveSource {
            locations: [
                ("still-there".to_string(), ("1".to_string(), "38".to_string())),
                ("moved-away".to_string(), ("2".to_string(), "40".to_string())),
            ]
            .into_iter()
            .collect(),
            failing: Vec::new(),
        };

        let report = evaluate_campaign(&campaign(), &source, &store, now).await;
        assert!(report.ok);
        assert_eq!(report.expired, vec!["still-there", "moved-away"]);
        assert_eq!(report.confirmed, vec!["still-there"]);
        assert_eq!(report.unconfirmed, vec!["moved-away"]);
        assert_eq!(report.threshold, Some(now - 4 * 86_400_000));

        // Unconfirmed cards stay in the snapshot; removal is the mutation
        // hook's job, triggered by the actual upstream move event.
        let snapshot = load_cache(&store, "c1").unwrap().unwrap();
        assert_eq!(snapshot.cards.len(), 3);
    }

    #[tokio::test]
    async fn unconfigured_campaign_reports_disabled() {
        let store = MemoryStore::new();
        let source = LiveSource {
            locations: std::collections::HashMap::new(),
            failing: Vec::new(),
        };
        let report = evaluate_campaign(
            &json!({"id": "c1", "base": {"pipeline": "1", "status": "38"}}),
            &source,
            &store,
            0,
        )
        .await;
        assert!(!report.ok);
        assert_eq!(report.message.as_deref(), Some("expiration_not_configured"));
    }

    #[tokio::test]
    async fn missing_snapshot_reports_cache_missing() {
        let store = MemoryStore::new();
        let source = LiveSource {
            locations: std::collections::HashMap::new(),
            failing: Vec::new(),
        };
        let report = evaluate_campaign(&campaign(), &source, &store, 0).await;
        assert!(!report.ok);
        assert_eq!(report.message.as_deref(), Some("cache_missing"));
    }

    #[tokio::test]
    async fn rows_without_entered_at_are_counted_not_expired() {
        let store = MemoryStore::new();
        save_cache(&store, &cache_with(vec![row("a", None), row("b", None)])).unwrap();
        let source = LiveSource {
            locations: std::collections::HashMap::new(),
            failing: Vec::new(),
        };
        let report = evaluate_campaign(&campaign(), &source, &store, 1_700_000_000_000).await;
        assert!(report.ok);
        assert!(report.expired.is_empty());
        assert_eq!(report.missing_entered_at, 2);
    }
}
