/// Job identifiers are random UUIDs, rendered as hyphenated strings on the wire.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Parse a job id received from a client (path segment, query string).
pub fn parse_job_id(raw: &str) -> Result<JobId, crate::error::CoreError> {
    raw.trim().parse().map_err(|_| {
        crate::error::CoreError::Validation(format!("Malformed job id: '{raw}'"))
    })
}
