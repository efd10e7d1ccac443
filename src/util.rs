use chrono::Utc;

/// Current wall-clock time as epoch milliseconds.
///
/// All snapshot timestamps (`enteredAt`, `fetchedAt`, `updatedAt`) are epoch
/// ms so they compare directly against the TTL threshold math.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
