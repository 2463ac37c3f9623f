use chrono::{DateTime, Utc};

/// Wall clock for request handlers. Services take `now` as an argument so tests
/// can move time freely.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn from_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
