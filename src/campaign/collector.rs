//! Base-cohort collection.
//!
//! Rebuilds a campaign's snapshot from scratch: page through the card
//! listing for the base pair (all-or-nothing — a partial listing would
//! silently undercount the cohort), then fetch each card's detail
//! sequentially (best-effort — one card's failure only costs that card),
//! extract its entry timestamp, and persist the full replacement snapshot.

use serde_json::Value;

use crate::crm::cards::{card_id_of, live_location};
use crate::crm::CardSource;
use crate::extract::{find_entered_at, raw_display, to_epoch_ms};
use crate::store::SnapshotStore;
use crate::util::now_ms;

use super::cache::save_cache;
use super::resolver::resolve_base_pair;
use super::{BaseEnteredCache, BaseEnteredCard, CardFetchError, CollectReport};

/// Listing page size.
pub const PAGE_SIZE: usize = 100;

/// Campaign id as a non-empty string; numbers are stringified.
pub fn campaign_id_of(campaign: &Value) -> Option<String> {
    match campaign.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Collect the campaign's base cohort and persist a brand-new snapshot.
///
/// Configuration problems and listing failures come back as `ok:false`
/// reports; per-card detail failures are collected into `errors` and the run
/// still succeeds.
pub async fn collect_base_cards(
    campaign: &Value,
    source: &dyn CardSource,
    store: &dyn SnapshotStore,
) -> CollectReport {
    let Some(campaign_id) = campaign_id_of(campaign) else {
        return CollectReport::failed("campaign_id_missing");
    };
    let Some(base) = resolve_base_pair(campaign) else {
        return CollectReport::failed("base_pair_missing");
    };

    let fail = |message: String| CollectReport {
        pipeline_id: Some(base.pipeline_id.clone()),
        status_id: Some(base.status_id.clone()),
        ..CollectReport::failed(message)
    };

    // List phase: all-or-nothing
    let mut card_ids: Vec<String> = Vec::new();
    let mut listed = 0usize;
    let mut page: u64 = 1;
    loop {
        let page_result = match source
            .list_page(&base.pipeline_id, &base.status_id, page, PAGE_SIZE)
            .await
        {
            Ok(page_result) => page_result,
            Err(e) => {
                log::warn!(
                    "campaign {}: listing aborted on page {}: {}",
                    campaign_id,
                    page,
                    e
                );
                return fail(e.to_string());
            }
        };

        let items = page_result.items.len();
        listed += items;
        card_ids.extend(page_result.items.iter().filter_map(card_id_of));
        if !page_result.has_more(PAGE_SIZE) {
            break;
        }
        log::debug!(
            "campaign {}: page {} had {} items, continuing",
            campaign_id,
            page,
            items
        );
        page += 1;
    }

    log::info!(
        "campaign {}: listed {} cards in {}/{}",
        campaign_id,
        listed,
        base.pipeline_id,
        base.status_id
    );

    // Detail phase: best-effort, sequential to stay under the vendor's rate
    // limits
    let mut cards: Vec<BaseEnteredCard> = Vec::new();
    let mut errors: Vec<CardFetchError> = Vec::new();
    for card_id in &card_ids {
        match source.card_detail(card_id).await {
            Ok(detail) => {
                let raw = find_entered_at(&detail);
                let entered_at = raw.as_ref().and_then(to_epoch_ms);
                let (pipeline_id, status_id) = live_location(&detail);
                cards.push(BaseEnteredCard {
                    card_id: card_id.clone(),
                    pipeline_id,
                    status_id,
                    entered_at,
                    entered_at_raw: raw.as_ref().and_then(raw_display),
                    fetched_at: now_ms(),
                });
            }
            Err(e) => {
                log::warn!("campaign {}: card {} detail failed: {}", campaign_id, card_id, e);
                errors.push(CardFetchError {
                    card_id: card_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let detail_fetched = cards.len();
    let updated_at = now_ms();
    let cache = BaseEnteredCache {
        campaign_id: campaign_id.clone(),
        pipeline_id: base.pipeline_id.clone(),
        status_id: base.status_id.clone(),
        updated_at,
        cards: cards.clone(),
    };
    if let Err(e) = save_cache(store, &cache) {
        log::warn!("campaign {}: snapshot write failed: {}", campaign_id, e);
        return fail(e.to_string());
    }

    log::info!(
        "campaign {}: snapshot rebuilt ({} cards, {} detail failures)",
        campaign_id,
        detail_fetched,
        errors.len()
    );

    CollectReport {
        ok: true,
        message: None,
        pipeline_id: Some(base.pipeline_id),
        status_id: Some(base.status_id),
        listed,
        detail_fetched,
        updated_at: Some(updated_at),
        cards,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::cache::load_cache;
    use crate::crm::{CardPage, CrmError};
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;

    /// Scripted card source: a fixed set of listing pages plus per-card
    /// details, with optional failure injection.
    struct ScriptedSource {
        pages: Vec<CardPage>,
        details: std::collections::HashMap<String, Value>,
        failing_details: Vec<String>,
    }

    impl ScriptedSource {
        fn single_page(details: Vec<(String, Value)>) -> Self {
            let items = details
                .iter()
                .map(|(id, _)| json!({ "id": id }))
                .collect::<Vec<_>>();
            Self {
                pages: vec![CardPage {
                    items,
                    ..Default::default()
                }],
                details: details.into_iter().collect(),
                failing_details: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CardSource for ScriptedSource {
        async fn list_page(
            &self,
            _pipeline_id: &str,
            _status_id: &str,
            page: u64,
            _per_page: usize,
        ) -> Result<CardPage, CrmError> {
            self.pages
                .get((page - 1) as usize)
                .cloned()
                .ok_or_else(|| CrmError::Envelope("page out of script".to_string()))
        }

        async fn card_detail(&self, card_id: &str) -> Result<Value, CrmError> {
            if self.failing_details.iter().any(|id| id == card_id) {
                return Err(CrmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            self.details
                .get(card_id)
                .cloned()
                .ok_or_else(|| CrmError::Envelope("unknown card".to_string()))
        }
    }

    /// Listing that always fails.
    struct BrokenListing;

    #[async_trait]
    impl CardSource for BrokenListing {
        async fn list_page(
            &self,
            _pipeline_id: &str,
            _status_id: &str,
            _page: u64,
            _per_page: usize,
        ) -> Result<CardPage, CrmError> {
            Err(CrmError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            })
        }

        async fn card_detail(&self, _card_id: &str) -> Result<Value, CrmError> {
            unreachable!("listing failure must abort before any detail fetch")
        }
    }

    fn campaign() -> Value {
        json!({
            "id": "c1",
            "base": {"pipeline": "1", "status": "38"}
        })
    }

    fn detail(entered_at: Value) -> Value {
        json!({
            "status": {"id": 38, "pipeline_id": 1},
            "status_entered_at": entered_at
        })
    }

    #[tokio::test]
    async fn missing_campaign_id_fails_before_any_io() {
        let store = MemoryStore::new();
        let report =
            collect_base_cards(&json!({"base": {"pipeline": "1", "status": "38"}}), &BrokenListing, &store)
                .await;
        assert!(!report.ok);
        assert_eq!(report.message.as_deref(), Some("campaign_id_missing"));
    }

    #[tokio::test]
    async fn missing_base_pair_fails_before_any_io() {
        let store = MemoryStore::new();
        let report = collect_base_cards(&json!({"id": "c1"}), &BrokenListing, &store).await;
        assert!(!report.ok);
        assert_eq!(report.message.as_deref(), Some("base_pair_missing"));
    }

    #[tokio::test]
    async fn listing_error_aborts_the_whole_run() {
        let store = MemoryStore::new();
        let report = collect_base_cards(&campaign(), &BrokenListing, &store).await;
        assert!(!report.ok);
        assert!(report.message.unwrap().contains("502"));
        assert!(load_cache(&store, "c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn happy_path_snapshot_matches_detail_fetched() {
        let source = ScriptedSource::single_page(vec![
            ("10".to_string(), detail(json!(1_700_000_000))),
            ("11".to_string(), detail(json!("2023-11-14 22:13:20"))),
            ("12".to_string(), detail(json!("soon"))),
        ]);
        let store = MemoryStore::new();
        let report = collect_base_cards(&campaign(), &source, &store).await;

        assert!(report.ok);
        assert_eq!(report.listed, 3);
        assert_eq!(report.detail_fetched, 3);
        assert!(report.errors.is_empty());

        let snapshot = load_cache(&store, "c1").unwrap().unwrap();
        assert_eq!(snapshot.cards.len(), report.detail_fetched);
        assert_eq!(snapshot.pipeline_id, "1");
        assert_eq!(snapshot.status_id, "38");

        // Parsed timestamps: seconds-scale and date-string both land on ms
        assert_eq!(snapshot.cards[0].entered_at, Some(1_700_000_000_000));
        assert_eq!(snapshot.cards[1].entered_at, Some(1_700_000_000_000));
        // Unparseable raw kept for diagnostics, ts null
        assert_eq!(snapshot.cards[2].entered_at, None);
        assert_eq!(snapshot.cards[2].entered_at_raw.as_deref(), Some("soon"));
    }

    #[tokio::test]
    async fn one_failing_detail_drops_only_that_card() {
        let mut source = ScriptedSource::single_page(
            (0..10)
                .map(|i| ((100 + i).to_string(), detail(json!(1_700_000_000))))
                .collect(),
        );
        source.failing_details = vec!["104".to_string()];
        let store = MemoryStore::new();
        let report = collect_base_cards(&campaign(), &source, &store).await;

        assert!(report.ok);
        assert_eq!(report.listed, 10);
        assert_eq!(report.detail_fetched, 9);
        assert_eq!(report.cards.len(), 9);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].card_id, "104");
    }

    #[tokio::test]
    async fn pagination_follows_meta_counters() {
        let page = |ids: &[u64], current: u64, last: u64| CardPage {
            items: ids.iter().map(|id| json!({"id": id})).collect(),
            current_page: Some(current),
            last_page: Some(last),
            next: None,
        };
        let mut details = std::collections::HashMap::new();
        for id in [1u64, 2, 3] {
            details.insert(id.to_string(), detail(json!(1_700_000_000)));
        }
        let source = ScriptedSource {
            pages: vec![page(&[1, 2], 1, 2), page(&[3], 2, 2)],
            details,
            failing_details: Vec::new(),
        };
        let store = MemoryStore::new();
        let report = collect_base_cards(&campaign(), &source, &store).await;

        assert!(report.ok);
        assert_eq!(report.listed, 3);
        assert_eq!(report.detail_fetched, 3);
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl crate::store::SnapshotStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn snapshot_write_failure_is_terminal() {
        let source =
            ScriptedSource::single_page(vec![("10".to_string(), detail(json!(1_700_000_000)))]);
        let report = collect_base_cards(&campaign(), &source, &ReadOnlyStore).await;

        assert!(!report.ok);
        assert_eq!(
            report.message.as_deref(),
            Some(StoreError::Poisoned.to_string().as_str())
        );
        // The failed run still echoes the pair it was collecting for
        assert_eq!(report.pipeline_id.as_deref(), Some("1"));
        assert_eq!(report.status_id.as_deref(), Some("38"));
    }

    #[tokio::test]
    async fn collection_replaces_the_previous_snapshot_wholesale() {
        let store = MemoryStore::new();

        let first = ScriptedSource::single_page(vec![
            ("10".to_string(), detail(json!(1_700_000_000))),
            ("11".to_string(), detail(json!(1_700_000_000))),
        ]);
        collect_base_cards(&campaign(), &first, &store).await;

        let second =
            ScriptedSource::single_page(vec![("12".to_string(), detail(json!(1_700_000_000)))]);
        let report = collect_base_cards(&campaign(), &second, &store).await;
        assert!(report.ok);

        let snapshot = load_cache(&store, "c1").unwrap().unwrap();
        let ids: Vec<&str> = snapshot.cards.iter().map(|c| c.card_id.as_str()).collect();
        assert_eq!(ids, vec!["12"]);
    }
}
