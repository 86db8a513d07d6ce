// Pipeline error taxonomy.
//
// Only schema, scale, configuration and deadline problems are errors.
// Degenerate batches (zero denominators, empty groups) resolve to defined
// defaults inside the stages, and embedding failures degrade per post.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// One or more required fields were absent from the input records.
    #[error("missing required fields: {} ({records} record(s) affected)", .fields.join(", "))]
    MissingFields {
        fields: Vec<&'static str>,
        records: usize,
    },

    #[error("invalid value for '{field}' in record {index}: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("duplicate post_id '{post_id}' in batch")]
    DuplicatePostId { post_id: String },

    /// The O(n^2) similarity matrix would exceed the configured size limit.
    #[error("batch of {size} posts exceeds the configured maximum of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("pipeline run exceeded its deadline of {limit_secs}s")]
    DeadlineExceeded { limit_secs: u64 },

    /// A similarity worker task panicked or was cancelled.
    #[error("similarity worker failed: {0}")]
    Worker(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
