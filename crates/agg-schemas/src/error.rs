use std::fmt;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Why a submission was refused before (or, for partition conflicts, while)
/// it reached the join engines. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent or empty (`id`, `embedding_type`, `embedding`, `index_name`).
    MissingField(&'static str),
    /// `embedding_type` was not one of the two known sides.
    UnknownSide(String),
    /// The payload contained NaN or an infinity at `index`.
    NonFiniteValue { index: usize },
    /// Writes for one id disagreed on the partition key.
    PartitionKeyConflict { id: String },
    /// An entry inside a batch failed validation; the whole batch is refused.
    BatchEntry {
        index: usize,
        reason: Box<ValidationError>,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => {
                write!(f, "missing or empty field '{field}'")
            }
            ValidationError::UnknownSide(side) => write!(
                f,
                "unknown embedding_type '{side}'. expected one of: EMBEDDINGS_TEXT | EMBEDDINGS_IMAGE"
            ),
            ValidationError::NonFiniteValue { index } => {
                write!(f, "embedding value at index {index} is not finite")
            }
            ValidationError::PartitionKeyConflict { id } => {
                write!(f, "partition key conflict for id '{id}'")
            }
            ValidationError::BatchEntry { index, reason } => {
                write!(f, "batch entry {index}: {reason}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// AggError
// ---------------------------------------------------------------------------

/// Errors surfaced by the store, the join engines and the forwarder.
///
/// Every failure path leaves the store untouched (or only additively
/// changed), so a caller can always retry and reconstruct the completed
/// record.
#[derive(Debug, Clone, PartialEq)]
pub enum AggError {
    /// Malformed submission or partition-key conflict. Not retryable.
    Validation(ValidationError),
    /// The shared store could not be reached, timed out, or returned a row
    /// that could not be decoded. Retry the whole submission.
    StoreUnavailable(String),
    /// A batch forward spanned more than one partition key. Nothing was
    /// forwarded or deleted.
    MixedPartition { keys: Vec<Option<String>> },
    /// The downstream sink returned a non-success status or could not be
    /// reached. Store entries were NOT deleted.
    SinkRejected {
        status: Option<u16>,
        message: String,
    },
}

impl AggError {
    /// Short stable tag for logs and structured responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AggError::Validation(_) => "VALIDATION",
            AggError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AggError::MixedPartition { .. } => "MIXED_PARTITION",
            AggError::SinkRejected { .. } => "SINK_REJECTED",
        }
    }

    /// `true` when retrying the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AggError::StoreUnavailable(_) | AggError::SinkRejected { .. }
        )
    }

    pub fn store(msg: impl fmt::Display) -> Self {
        AggError::StoreUnavailable(msg.to_string())
    }
}

impl fmt::Display for AggError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggError::Validation(e) => write!(f, "VALIDATION: {e}"),
            AggError::StoreUnavailable(msg) => write!(f, "STORE_UNAVAILABLE: {msg}"),
            AggError::MixedPartition { keys } => {
                let rendered: Vec<&str> = keys
                    .iter()
                    .map(|k| k.as_deref().unwrap_or("<default>"))
                    .collect();
                write!(f, "MIXED_PARTITION: batch spans keys {rendered:?}")
            }
            AggError::SinkRejected {
                status: Some(code),
                message,
            } => write!(f, "SINK_REJECTED status={code}: {message}"),
            AggError::SinkRejected {
                status: None,
                message,
            } => write!(f, "SINK_REJECTED: {message}"),
        }
    }
}

impl std::error::Error for AggError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for AggError {
    fn from(e: ValidationError) -> Self {
        AggError::Validation(e)
    }
}
