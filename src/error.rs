//! Error types for the DM funnel engine.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// AI-provider errors.
///
/// `RateLimited` and `QuotaExhausted` carry the credential identifier so the
/// rotation manager can flag the right entry. `Exhausted` means every
/// credential (secondary included) is flagged — the engine degrades this to
/// a pipeline miss, never a crash.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed for {credential}: {reason}")]
    RequestFailed { credential: String, reason: String },

    #[error("Credential {credential} is rate limited")]
    RateLimited { credential: String },

    #[error("Credential {credential} has exhausted its quota")]
    QuotaExhausted { credential: String },

    #[error("Invalid response from {credential}: {reason}")]
    InvalidResponse { credential: String, reason: String },

    #[error("All provider credentials exhausted")]
    Exhausted,
}

/// Conversation-store errors. Persistence failures are logged and treated
/// as non-fatal; in-memory state is still updated.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
