use thiserror::Error;

/// Classification of a failed source fetch. Adapters map provider responses
/// onto these kinds; collectors branch on the kind without unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Retry with backoff.
    Transient,
    /// Retry, honoring the provider's Retry-After hint when present.
    RateLimited,
    /// Terminal. Emit alert, disable the adapter, keep other collectors running.
    AuthFailed,
    /// Terminal for this key. No retry.
    NotFound,
    /// Terminal for this record. Drop it and continue.
    Malformed,
    /// Provider outage. Retry on the next tick.
    Unavailable,
}

impl FetchErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchErrorKind::Transient | FetchErrorKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::AuthFailed => "auth_failed",
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::Unavailable => "unavailable",
        }
    }
}

/// Error surfaced by a source adapter.
#[derive(Debug, Error)]
#[error("{source_name} fetch failed ({}): {message}", kind.as_str())]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub source_name: &'static str,
    pub message: String,
    /// Provider-supplied retry hint in seconds, if any (429 Retry-After).
    pub retry_after_secs: Option<u64>,
}

impl FetchError {
    pub fn new(source_name: &'static str, kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_name,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(
        source_name: &'static str,
        retry_after_secs: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            source_name,
            message: message.into(),
            retry_after_secs,
        }
    }
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Deadlock or lock-wait timeout that survived the retry budget.
    /// Callers skip the affected key and continue.
    #[error("lock contention on {table}")]
    LockContention { table: String },

    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("database unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("schema defect: {reason}")]
    Schema { reason: String },
}

/// Rejected control-plane request. Maps to a 4xx, never a crash.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("illegal transition: {component} is {state}, cannot {requested}")]
    IllegalState {
        component: String,
        state: String,
        requested: String,
    },

    #[error("unknown component: {0}")]
    UnknownComponent(String),
}

/// True when `err` carries a `StoreError::LockContention` anywhere in its chain.
pub fn is_lock_contention(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::LockContention { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_formatting_includes_kind() {
        let err = FetchError::new("coingecko", FetchErrorKind::AuthFailed, "401 unauthorized");
        let msg = err.to_string();
        assert!(msg.contains("coingecko"));
        assert!(msg.contains("auth_failed"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(FetchErrorKind::Transient.is_retryable());
        assert!(FetchErrorKind::RateLimited.is_retryable());
        assert!(!FetchErrorKind::AuthFailed.is_retryable());
        assert!(!FetchErrorKind::NotFound.is_retryable());
        assert!(!FetchErrorKind::Malformed.is_retryable());
    }

    #[test]
    fn lock_contention_survives_anyhow_chain() {
        let err = anyhow::Error::from(StoreError::LockContention {
            table: "ml_features_materialized".to_string(),
        });
        assert!(is_lock_contention(&err));

        let other = anyhow::anyhow!("something else");
        assert!(!is_lock_contention(&other));
    }
}
