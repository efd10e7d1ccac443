//! Tolerant campaign field resolution.
//!
//! Campaign records have gone through several admin-form generations, so the
//! same concept hides under different names: the base pair may be a nested
//! `base` object or flat `base_pipeline_id`-style fields, the expiration
//! target lives under `texp` or `exp`, and the day TTL under half a dozen
//! legacy keys. Resolution is an ordered list of extractors, first non-empty
//! wins. The priority order is load-bearing for ambiguous legacy records —
//! preserve it.

use serde_json::Value;

use super::{BasePair, ExpirationConfig};

/// Candidate keys for the pipeline half of a pair object, in priority order.
const PIPELINE_KEYS: &[&str] = &["pipeline", "pipeline_id", "pipelineId", "id"];
/// Candidate keys for the status half of a pair object, in priority order.
const STATUS_KEYS: &[&str] = &["status", "status_id", "statusId"];

/// First non-empty id among `keys` on `obj`; numbers are stringified.
fn first_id(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(id_value))
}

fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve a pair object's halves independently; either may be missing.
fn pair_halves(target: &Value) -> (Option<String>, Option<String>) {
    (first_id(target, PIPELINE_KEYS), first_id(target, STATUS_KEYS))
}

/// Resolve the campaign's base (pipeline, status) pair.
///
/// Nested `base` object first, then flat legacy fields as fallback for
/// whichever half the object did not supply. Both halves required. Pure,
/// never panics on malformed shapes — they simply fail to resolve.
pub fn resolve_base_pair(campaign: &Value) -> Option<BasePair> {
    let (mut pipeline, mut status) = campaign
        .get("base")
        .map(pair_halves)
        .unwrap_or((None, None));

    if pipeline.is_none() {
        pipeline = first_id(campaign, &["base_pipeline_id", "basePipelineId"]);
    }
    if status.is_none() {
        status = first_id(campaign, &["base_status_id", "baseStatusId"]);
    }

    Some(BasePair {
        pipeline_id: pipeline?,
        status_id: status?,
    })
}

/// Resolve the campaign's full expiration configuration.
///
/// All-or-nothing: requires a base pair, a target pair (from `texp`, then an
/// object-valued `exp`), and a strictly-positive finite day TTL (scanned
/// across `expDays`, scalar `exp`, `expireDays`, `expire`, `vexp`, then the
/// target object's own `days`). Any missing piece disables expiration for
/// the campaign — None is the "disabled" sentinel, not an error.
pub fn resolve_expiration_config(campaign: &Value) -> Option<ExpirationConfig> {
    let base = resolve_base_pair(campaign)?;

    let target_obj = campaign
        .get("texp")
        .filter(|v| v.is_object())
        .or_else(|| campaign.get("exp").filter(|v| v.is_object()));
    let (target_pipeline, target_status) = target_obj.map(pair_halves).unwrap_or((None, None));

    let days = campaign
        .get("expDays")
        .and_then(positive_days)
        .or_else(|| {
            campaign
                .get("exp")
                .filter(|v| !v.is_object())
                .and_then(positive_days)
        })
        .or_else(|| campaign.get("expireDays").and_then(positive_days))
        .or_else(|| campaign.get("expire").and_then(positive_days))
        .or_else(|| campaign.get("vexp").and_then(positive_days))
        .or_else(|| target_obj.and_then(|t| t.get("days")).and_then(positive_days));

    Some(ExpirationConfig {
        base_pipeline_id: base.pipeline_id,
        base_status_id: base.status_id,
        target_pipeline_id: target_pipeline?,
        target_status_id: target_status?,
        days: days?,
    })
}

/// Coerce a value to a strictly-positive finite day count; strings are
/// parsed as numbers.
fn positive_days(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (n.is_finite() && n > 0.0).then_some(n)
}
