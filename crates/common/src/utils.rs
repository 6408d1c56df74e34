use chrono::{SecondsFormat, Utc};

/// Get the current UTC time as an ISO-8601 string, used to stamp error records
pub fn current_timestamp_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
