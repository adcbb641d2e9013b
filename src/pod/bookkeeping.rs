//! Breaker bookkeeping annotations (`breakAt`, `retryCount`).

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::pod::model::{MetadataPatch, Pod};
use crate::pod::traffic::{TrafficState, LABEL_STRATEGY, LABEL_TRAFFIC};

pub const ANNOTATION_BREAK_AT: &str = "breakAt";
pub const ANNOTATION_RETRY_COUNT: &str = "retryCount";

/// Bookkeeping attached to a cut pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookkeeping {
    /// Time of the most recent cut.
    pub break_at: DateTime<Utc>,
    /// Number of cuts applied so far.
    pub retry_count: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookkeepingError {
    #[error("missing {0} annotation")]
    Missing(&'static str),

    #[error("invalid breakAt '{0}'")]
    InvalidBreakAt(String),

    #[error("invalid retryCount '{0}'")]
    InvalidRetryCount(String),
}

impl Bookkeeping {
    /// Read both annotations. Either one missing or malformed is an error.
    pub fn read(pod: &Pod) -> Result<Self, BookkeepingError> {
        let raw_break_at = pod
            .annotation(ANNOTATION_BREAK_AT)
            .ok_or(BookkeepingError::Missing(ANNOTATION_BREAK_AT))?;
        let raw_retry_count = pod
            .annotation(ANNOTATION_RETRY_COUNT)
            .ok_or(BookkeepingError::Missing(ANNOTATION_RETRY_COUNT))?;

        let break_at = DateTime::parse_from_rfc3339(raw_break_at)
            .map_err(|_| BookkeepingError::InvalidBreakAt(raw_break_at.to_string()))?
            .with_timezone(&Utc);
        let retry_count = raw_retry_count
            .parse()
            .map_err(|_| BookkeepingError::InvalidRetryCount(raw_retry_count.to_string()))?;

        Ok(Self { break_at, retry_count })
    }
}

/// Retry count recorded by the previous cut; absent or unreadable counts as 0.
pub fn previous_retry_count(pod: &Pod) -> u32 {
    pod.annotation(ANNOTATION_RETRY_COUNT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Patch that cuts `pod` on behalf of `strategy` at `now`.
pub fn cut_patch(pod: &Pod, strategy: &str, now: DateTime<Utc>) -> MetadataPatch {
    let retry_count = previous_retry_count(pod).saturating_add(1);
    MetadataPatch::default()
        .set_label(LABEL_TRAFFIC, TrafficState::No.as_str())
        .set_label(LABEL_STRATEGY, strategy)
        .set_annotation(ANNOTATION_BREAK_AT, format_timestamp(now))
        .set_annotation(ANNOTATION_RETRY_COUNT, retry_count.to_string())
}

/// Patch that flips only the traffic flag.
pub fn traffic_patch(state: TrafficState) -> MetadataPatch {
    MetadataPatch::default().set_label(LABEL_TRAFFIC, state.as_str())
}

/// Patch removing every breaker label and annotation.
pub fn strip_patch() -> MetadataPatch {
    MetadataPatch::default()
        .remove_label(LABEL_TRAFFIC)
        .remove_label(LABEL_STRATEGY)
        .remove_annotation(ANNOTATION_BREAK_AT)
        .remove_annotation(ANNOTATION_RETRY_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_cut_increments_from_absent() {
        let pod = Pod::new("ns", "a");
        let cut = pod.patched(&cut_patch(&pod, "errors", at(1_000)));

        let book = Bookkeeping::read(&cut).unwrap();
        assert_eq!(book.retry_count, 1);
        assert_eq!(book.break_at, at(1_000));
        assert_eq!(cut.traffic(), Some(TrafficState::No));
        assert_eq!(cut.strategy(), Some("errors"));
    }

    #[test]
    fn test_recut_increments_by_one() {
        let pod = Pod::new("ns", "a");
        let first = pod.patched(&cut_patch(&pod, "errors", at(1_000)));
        let second = first.patched(&cut_patch(&first, "errors", at(2_000)));

        let book = Bookkeeping::read(&second).unwrap();
        assert_eq!(book.retry_count, 2);
        assert_eq!(book.break_at, at(2_000));
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let mut pod = Pod::new("ns", "a");
        assert_eq!(
            Bookkeeping::read(&pod),
            Err(BookkeepingError::Missing(ANNOTATION_BREAK_AT))
        );

        pod.metadata
            .annotations
            .insert(ANNOTATION_BREAK_AT.into(), format_timestamp(at(5)));
        assert_eq!(
            Bookkeeping::read(&pod),
            Err(BookkeepingError::Missing(ANNOTATION_RETRY_COUNT))
        );

        pod.metadata
            .annotations
            .insert(ANNOTATION_RETRY_COUNT.into(), "many".into());
        assert!(matches!(
            Bookkeeping::read(&pod),
            Err(BookkeepingError::InvalidRetryCount(_))
        ));
    }

    #[test]
    fn test_strip_removes_everything() {
        let pod = Pod::new("ns", "a");
        let cut = pod.patched(&cut_patch(&pod, "errors", at(1)));
        let stripped = cut.patched(&strip_patch());

        assert_eq!(stripped.traffic(), None);
        assert_eq!(stripped.strategy(), None);
        assert!(stripped.metadata.annotations.is_empty());
    }
}
