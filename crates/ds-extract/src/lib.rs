//! DomShift Payload Extractor
//!
//! This crate decodes the host SDK's experiment definitions and each
//! variant's change and injection payloads into `ds-core` types. Every
//! directive is validated on its own; invalid ones are dropped and reported,
//! never fatal.

pub mod experiments;
pub mod payload;
pub mod validate;

pub use experiments::{extract_experiments, extract_experiments_json, Extraction, ExtractKeys, Issue, IssueDetail};
pub use payload::{
    decode_change, decode_injections, decode_payload, decode_payload_lossy, decode_url_filter, DecodedPayload,
    DroppedChange, RawChange,
};
pub use validate::ValidationError;

/// Error type for payload decoding.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid payload shape: {0}")]
    Shape(String),
}
