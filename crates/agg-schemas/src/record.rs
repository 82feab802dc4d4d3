use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An embedding vector. Order is significant.
pub type Payload = Vec<f64>;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Which half of a pair a payload fills.
///
/// Wire names match the producers of the batch vectorization jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "EMBEDDINGS_TEXT")]
    Text,
    #[serde(rename = "EMBEDDINGS_IMAGE")]
    Image,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Text, Side::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Text => "EMBEDDINGS_TEXT",
            Side::Image => "EMBEDDINGS_IMAGE",
        }
    }

    /// The counterpart side needed to complete a pair.
    pub fn other(&self) -> Side {
        match self {
            Side::Text => Side::Image,
            Side::Image => Side::Text,
        }
    }

    /// Accepts the wire names (any case) and the short aliases `text` / `image`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMBEDDINGS_TEXT" | "TEXT" => Ok(Side::Text),
            "EMBEDDINGS_IMAGE" | "IMAGE" => Ok(Side::Image),
            "" => Err(ValidationError::MissingField("embedding_type")),
            other => Err(ValidationError::UnknownSide(other.to_string())),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SideEntry
// ---------------------------------------------------------------------------

/// A validated `(id, side, payload, partition_key?)` submission.
///
/// Fields are private: the only way to obtain a `SideEntry` is
/// [`SideEntry::new`], so the engines never see an empty id, an empty
/// payload or a non-finite value.
#[derive(Debug, Clone, PartialEq)]
pub struct SideEntry {
    id: String,
    side: Side,
    payload: Payload,
    partition_key: Option<String>,
}

impl SideEntry {
    pub fn new(
        id: impl Into<String>,
        side: Side,
        payload: Payload,
        partition_key: Option<String>,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if payload.is_empty() {
            return Err(ValidationError::MissingField("embedding"));
        }
        if let Some(index) = payload.iter().position(|v| !v.is_finite()) {
            return Err(ValidationError::NonFiniteValue { index });
        }
        if matches!(&partition_key, Some(k) if k.trim().is_empty()) {
            return Err(ValidationError::MissingField("index_name"));
        }

        Ok(Self {
            id,
            side,
            payload,
            partition_key,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn payload(&self) -> &[f64] {
        &self.payload
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }
}

// ---------------------------------------------------------------------------
// JoinState
// ---------------------------------------------------------------------------

/// Lifecycle of one id: `Absent → OneSidePresent → Complete`, then deleted
/// back to `Absent` once ingestion is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Absent,
    OneSidePresent(Side),
    Complete,
}

impl JoinState {
    pub fn of(record: Option<&PartialRecord>) -> Self {
        match record {
            None => JoinState::Absent,
            Some(r) => r.state(),
        }
    }
}

// ---------------------------------------------------------------------------
// PartialRecord
// ---------------------------------------------------------------------------

/// Per-id state owned by the store.
///
/// # Invariants
/// - At most one payload per side; the last write for a side wins.
/// - `partition_key` is set by the first write that carries one and never
///   changes afterwards. A later write with a different key sets the sticky
///   `partition_conflict` flag instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub id: String,
    pub sides: BTreeMap<Side, Payload>,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub partition_conflict: bool,
}

impl PartialRecord {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sides: BTreeMap::new(),
            partition_key: None,
            partition_conflict: false,
        }
    }

    pub fn has_side(&self, side: Side) -> bool {
        self.sides.contains_key(&side)
    }

    pub fn is_complete(&self) -> bool {
        Side::ALL.iter().all(|s| self.has_side(*s))
    }

    pub fn state(&self) -> JoinState {
        match (self.has_side(Side::Text), self.has_side(Side::Image)) {
            (true, true) => JoinState::Complete,
            (true, false) => JoinState::OneSidePresent(Side::Text),
            (false, true) => JoinState::OneSidePresent(Side::Image),
            (false, false) => JoinState::Absent,
        }
    }

    /// Field-level merge of one side. Other sides are never touched.
    pub fn merge(&mut self, entry: &SideEntry) {
        self.sides.insert(entry.side(), entry.payload().to_vec());
        match (&self.partition_key, entry.partition_key()) {
            (None, Some(k)) => self.partition_key = Some(k.to_string()),
            (Some(current), Some(k)) if current != k => self.partition_conflict = true,
            _ => {}
        }
    }

    /// Build the completed view.
    ///
    /// `Ok(None)` while a side is still missing. A complete record whose
    /// writes disagreed on the partition key is refused.
    pub fn to_completed(&self) -> Result<Option<CompletedRecord>, ValidationError> {
        let (Some(text), Some(image)) = (self.sides.get(&Side::Text), self.sides.get(&Side::Image))
        else {
            return Ok(None);
        };
        if self.partition_conflict {
            return Err(ValidationError::PartitionKeyConflict {
                id: self.id.clone(),
            });
        }
        Ok(Some(CompletedRecord {
            id: self.id.clone(),
            text: text.clone(),
            image: image.clone(),
            partition_key: self.partition_key.clone(),
        }))
    }

    /// Whether this stored state is exactly what `forwarded` carried.
    ///
    /// A side overwritten after the completed view was taken makes this
    /// `false`; such a record must stay in the store.
    pub fn is_unchanged_since(&self, forwarded: &CompletedRecord) -> bool {
        self.id == forwarded.id
            && !self.partition_conflict
            && self.partition_key == forwarded.partition_key
            && self.sides.len() == Side::ALL.len()
            && self.sides.get(&Side::Text) == Some(&forwarded.text)
            && self.sides.get(&Side::Image) == Some(&forwarded.image)
    }
}

// ---------------------------------------------------------------------------
// MergeOutcome
// ---------------------------------------------------------------------------

/// Result of one atomic per-id merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Record state immediately after the merge.
    pub record: PartialRecord,
    /// Whether the record already held both sides before the merge.
    pub was_complete: bool,
}

impl MergeOutcome {
    /// `true` only on the `OneSidePresent → Complete` transition.
    pub fn newly_completed(&self) -> bool {
        !self.was_complete && self.record.is_complete()
    }
}

// ---------------------------------------------------------------------------
// CompletedRecord
// ---------------------------------------------------------------------------

/// Both halves of a pair, ready for ingestion.
///
/// Serializes to the body the ingestion service expects:
/// `{"id": .., "EMBEDDINGS_TEXT": [..], "EMBEDDINGS_IMAGE": [..], "index_name": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub id: String,
    #[serde(rename = "EMBEDDINGS_TEXT")]
    pub text: Payload,
    #[serde(rename = "EMBEDDINGS_IMAGE")]
    pub image: Payload,
    #[serde(
        rename = "index_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub partition_key: Option<String>,
}

impl CompletedRecord {
    pub fn payload(&self, side: Side) -> &[f64] {
        match side {
            Side::Text => &self.text,
            Side::Image => &self.image,
        }
    }
}
