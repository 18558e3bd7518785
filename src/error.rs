//! Error taxonomy for the enrichment run.
//!
//! Only a subset of these stop the run. Row-level faults (`Navigation`,
//! `Timeout`) are caught by the pipeline, logged with the row index and
//! left for the next resume.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("malformed seed data: {0}")]
    MalformedInput(String),

    #[error("spreadsheet store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("seed data could not be obtained: {0}")]
    SeedUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EnrichError {
    pub fn navigation(url: &str, reason: impl ToString) -> Self {
        EnrichError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn store(reason: impl ToString) -> Self {
        EnrichError::StoreUnavailable(reason.to_string())
    }

    /// Fatal errors end the run; everything else is isolated to one row.
    pub fn is_fatal(&self) -> bool {
        match self {
            EnrichError::MalformedInput(_)
            | EnrichError::StoreUnavailable(_)
            | EnrichError::SeedUnavailable(_)
            | EnrichError::Config(_) => true,
            EnrichError::Navigation { .. } | EnrichError::Timeout { .. } => false,
        }
    }
}

impl From<csv::Error> for EnrichError {
    fn from(err: csv::Error) -> Self {
        EnrichError::MalformedInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_faults_are_not_fatal() {
        assert!(!EnrichError::navigation("https://x", "reset").is_fatal());
        assert!(!EnrichError::Timeout { what: "page".into(), secs: 3 }.is_fatal());
        assert!(EnrichError::store("503").is_fatal());
        assert!(EnrichError::MalformedInput("no header".into()).is_fatal());
    }

    #[test]
    fn navigation_message_names_url() {
        let err = EnrichError::navigation("https://patents.example/US1", "connection reset");
        assert_eq!(
            err.to_string(),
            "navigation to https://patents.example/US1 failed: connection reset"
        );
    }
}
