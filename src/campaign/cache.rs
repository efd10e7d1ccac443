//! Snapshot persistence and the post-move mutation hook.
//!
//! The snapshot round-trips through the blob store as one JSON value per
//! campaign. A corrupt blob is logged and treated as absent — the next full
//! collection rewrites it anyway.

use std::collections::HashSet;

use crate::store::{SnapshotStore, StoreError};

use super::{snapshot_key, BaseEnteredCache};

/// Load a campaign's snapshot, if one exists.
pub fn load_cache(
    store: &dyn SnapshotStore,
    campaign_id: &str,
) -> Result<Option<BaseEnteredCache>, StoreError> {
    let Some(bytes) = store.get(&snapshot_key(campaign_id))? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(cache) => Ok(Some(cache)),
        Err(e) => {
            log::warn!(
                "snapshot for campaign {} is unparseable, treating as absent: {}",
                campaign_id,
                e
            );
            Ok(None)
        }
    }
}

/// Write a campaign's snapshot, replacing whatever was there.
pub fn save_cache(store: &dyn SnapshotStore, cache: &BaseEnteredCache) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(cache)?;
    store.set(&snapshot_key(&cache.campaign_id), &bytes)
}

/// Remove cards from a campaign's snapshot after upstream reported they left
/// the base pair.
///
/// The narrow path for "a webhook just moved one card": no re-list, no
/// re-detail. No snapshot means nothing to mutate (None). An empty removal
/// list returns the cache untouched — no write, no `updated_at` bump.
pub fn update_base_cache_after_move(
    store: &dyn SnapshotStore,
    campaign_id: &str,
    removed_card_ids: &[String],
    now: i64,
) -> Result<Option<BaseEnteredCache>, StoreError> {
    let Some(mut cache) = load_cache(store, campaign_id)? else {
        log::debug!("no snapshot for campaign {}, nothing to mutate", campaign_id);
        return Ok(None);
    };

    if removed_card_ids.is_empty() {
        return Ok(Some(cache));
    }

    let removed: HashSet<&str> = removed_card_ids.iter().map(String::as_str).collect();
    let before = cache.cards.len();
    cache.cards.retain(|card| !removed.contains(card.card_id.as_str()));
    cache.updated_at = now;
    save_cache(store, &cache)?;

    log::info!(
        "campaign {}: removed {} of {} snapshot cards after move",
        campaign_id,
        before - cache.cards.len(),
        before
    );
    Ok(Some(cache))
}
