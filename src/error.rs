use thiserror::Error;

/// Field-level normalization failure. The record keeps going with the
/// field nulled; the raw string is retained by the caller.
#[derive(Debug, Clone, Error)]
#[error("failed to normalize `{field}`: {reason}")]
pub struct NormalizationError {
    pub field: &'static str,
    pub reason: String,
}

impl NormalizationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Attachment-level extraction failure. Recoverable: the attachment is
/// marked text-unavailable and the batch continues.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type `{0}`")]
    Unsupported(String),

    #[error("near-empty text: {chars} chars over {pages} page(s)")]
    NearEmpty { chars: usize, pages: usize },

    #[error("`{tool}` failed: {detail}")]
    Tool { tool: &'static str, detail: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("all extraction steps failed")]
    AllStepsFailed,
}

/// Record-level geocoding failure. Request errors are retried with
/// backoff; everything else degrades to raw address + null coordinates.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("no geocoding API key configured")]
    NoApiKey,

    #[error("geocode request failed: {0}")]
    Request(String),

    #[error("no match for address")]
    NoMatch,
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeocodeError::Request(_))
    }
}

/// Two unrelated records hashed to the same item key with incompatible
/// addresses. Fatal for the record only: it is quarantined out of
/// auto-merge and surfaced for manual review.
#[derive(Debug, Clone, Error)]
#[error("identity collision on `{item_id}`: `{existing}` vs `{incoming}` disagree on address")]
pub struct IdentityCollisionError {
    pub item_id: String,
    pub existing: String,
    pub incoming: String,
}

/// Invariant breach in the provenance ledger. Fatal for the whole batch:
/// stopping the run beats corrupting history.
#[derive(Debug, Error)]
pub enum ProvenanceViolation {
    #[error("source_map would shrink: {before} rows before, {after} after")]
    RowRemoval { before: usize, after: usize },

    #[error("record `{record_id}` is assigned to `{assigned}` but a write was attempted under `{attempted}`")]
    ItemIdMutation {
        record_id: String,
        assigned: String,
        attempted: String,
    },
}
