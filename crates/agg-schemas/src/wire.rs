//! Inbound submission shapes.
//!
//! These mirror the JSON the vectorization jobs emit. Every field is optional
//! at decode time so a malformed body becomes a [`ValidationError`] naming
//! the missing field rather than an opaque serde error.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::{Side, SideEntry};

/// One embedding for one side of one id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSubmission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub embedding_type: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
    #[serde(default, alias = "partition_key")]
    pub index_name: Option<String>,
}

impl EmbeddingSubmission {
    pub fn validate(self) -> Result<SideEntry, ValidationError> {
        let id = self.id.ok_or(ValidationError::MissingField("id"))?;
        let side = Side::parse(self.embedding_type.as_deref().unwrap_or(""))?;
        let payload = self
            .embedding
            .ok_or(ValidationError::MissingField("embedding"))?;
        SideEntry::new(id, side, payload, self.index_name)
    }
}

/// Many submissions in one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEmbeddings {
    pub embeddings: Vec<EmbeddingSubmission>,
}

impl BatchEmbeddings {
    /// Validate every entry; the first failure refuses the whole batch.
    /// An empty batch validates to an empty list.
    pub fn validate(self) -> Result<Vec<SideEntry>, ValidationError> {
        self.embeddings
            .into_iter()
            .enumerate()
            .map(|(index, sub)| {
                sub.validate().map_err(|reason| ValidationError::BatchEntry {
                    index,
                    reason: Box::new(reason),
                })
            })
            .collect()
    }
}

/// Either body shape, for callers that accept both on one channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Submission {
    Batch(BatchEmbeddings),
    Single(EmbeddingSubmission),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_submission_validates() {
        let sub: EmbeddingSubmission = serde_json::from_value(json!({
            "id": "x1",
            "embedding_type": "EMBEDDINGS_TEXT",
            "embedding": [0.1, 0.2]
        }))
        .unwrap();
        let entry = sub.validate().unwrap();
        assert_eq!(entry.id(), "x1");
        assert_eq!(entry.side(), Side::Text);
        assert_eq!(entry.payload(), &[0.1, 0.2]);
        assert_eq!(entry.partition_key(), None);
    }

    #[test]
    fn missing_fields_are_named() {
        let no_id = EmbeddingSubmission {
            embedding_type: Some("EMBEDDINGS_TEXT".into()),
            embedding: Some(vec![1.0]),
            ..Default::default()
        };
        assert_eq!(no_id.validate().unwrap_err(), ValidationError::MissingField("id"));

        let no_type = EmbeddingSubmission {
            id: Some("a".into()),
            embedding: Some(vec![1.0]),
            ..Default::default()
        };
        assert_eq!(
            no_type.validate().unwrap_err(),
            ValidationError::MissingField("embedding_type")
        );

        let no_payload = EmbeddingSubmission {
            id: Some("a".into()),
            embedding_type: Some("image".into()),
            ..Default::default()
        };
        assert_eq!(
            no_payload.validate().unwrap_err(),
            ValidationError::MissingField("embedding")
        );
    }

    #[test]
    fn batch_reports_failing_index() {
        let batch: BatchEmbeddings = serde_json::from_value(json!({
            "embeddings": [
                {"id": "y", "embedding_type": "EMBEDDINGS_TEXT", "embedding": [1.0]},
                {"id": "y", "embedding_type": "EMBEDDINGS_IMAGE", "embedding": []}
            ]
        }))
        .unwrap();
        let err = batch.validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::BatchEntry {
                index: 1,
                reason: Box::new(ValidationError::MissingField("embedding")),
            }
        );
    }

    #[test]
    fn empty_batch_is_not_an_error() {
        let batch: BatchEmbeddings = serde_json::from_value(json!({"embeddings": []})).unwrap();
        assert!(batch.validate().unwrap().is_empty());
    }

    #[test]
    fn submission_decodes_either_shape() {
        let single: Submission = serde_json::from_value(json!({
            "id": "x1", "embedding_type": "text", "embedding": [1.0], "index_name": "docs"
        }))
        .unwrap();
        assert!(matches!(single, Submission::Single(_)));

        let batch: Submission = serde_json::from_value(json!({
            "embeddings": [{"id": "x1", "embedding_type": "text", "embedding": [1.0]}]
        }))
        .unwrap();
        assert!(matches!(batch, Submission::Batch(b) if b.embeddings.len() == 1));
    }

    #[test]
    fn partition_key_alias_is_accepted() {
        let sub: EmbeddingSubmission = serde_json::from_value(json!({
            "id": "k", "embedding_type": "image", "embedding": [1.0], "partition_key": "docs"
        }))
        .unwrap();
        assert_eq!(sub.validate().unwrap().partition_key(), Some("docs"));
    }
}
