use std::time::Duration;

use agg_schemas::{AggError, CompletedRecord};
use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

/// Longest slice of a rejection body carried into the error message.
const MAX_ERROR_BODY: usize = 512;

/// Downstream ingestion service.
///
/// Success means the records were durably accepted; the forwarder deletes
/// store entries only after `Ok(())`.
#[async_trait::async_trait]
pub trait IngestionSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ingest_one(&self, record: &CompletedRecord) -> Result<(), AggError>;

    /// Every record in `records` shares `partition_key`.
    async fn ingest_batch(
        &self,
        partition_key: Option<&str>,
        records: &[CompletedRecord],
    ) -> Result<(), AggError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// HTTP ingestion client.
///
/// - single: `POST {base}/ingest/{index}` with the record as JSON
/// - batch:  `POST {base}/ingest/{index}/batch` with `{"index_name", "records"}`
///
/// `{index}` is the record's partition key, or `default_index` when it has none.
#[derive(Debug, Clone)]
pub struct HttpIngestionSink {
    http: reqwest::Client,
    base_url: Url,
    default_index: String,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    index_name: &'a str,
    records: &'a [CompletedRecord],
}

impl HttpIngestionSink {
    pub fn new(base_url: &str, default_index: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid sink base_url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("sink base_url '{base_url}' cannot carry a path"));
        }
        if default_index.trim().is_empty() {
            return Err(anyhow!("sink default_index must not be empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            default_index: default_index.to_string(),
        })
    }

    pub fn index_for<'a>(&'a self, partition_key: Option<&'a str>) -> &'a str {
        partition_key.unwrap_or(&self.default_index)
    }

    pub fn ingest_url(&self, index: &str, batch: bool) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new(), so path_segments_mut is Ok.
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty().push("ingest").push(index);
            if batch {
                segs.push("batch");
            }
        }
        url
    }

    async fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<(), AggError> {
        let resp = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| AggError::SinkRejected {
                status: None,
                message: format!("request to {url} failed: {e}"),
            })?;

        let status = resp.status();
        if status.is_success() {
            debug!(%url, status = status.as_u16(), "sink accepted");
            return Ok(());
        }

        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(AggError::SinkRejected {
            status: Some(status.as_u16()),
            message: if body.is_empty() {
                format!("{url} returned {status}")
            } else {
                body
            },
        })
    }
}

#[async_trait::async_trait]
impl IngestionSink for HttpIngestionSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn ingest_one(&self, record: &CompletedRecord) -> Result<(), AggError> {
        let index = self.index_for(record.partition_key.as_deref());
        self.post(self.ingest_url(index, false), record).await
    }

    async fn ingest_batch(
        &self,
        partition_key: Option<&str>,
        records: &[CompletedRecord],
    ) -> Result<(), AggError> {
        let index = self.index_for(partition_key);
        let body = BatchBody {
            index_name: index,
            records,
        };
        self.post(self.ingest_url(index, true), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> HttpIngestionSink {
        HttpIngestionSink::new("http://database-service:8000/", "embeddings", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn url_uses_partition_key_or_default() {
        let s = sink();
        assert_eq!(
            s.ingest_url(s.index_for(Some("docs")), false).as_str(),
            "http://database-service:8000/ingest/docs"
        );
        assert_eq!(
            s.ingest_url(s.index_for(None), true).as_str(),
            "http://database-service:8000/ingest/embeddings/batch"
        );
    }

    #[test]
    fn index_names_are_path_escaped() {
        let s = sink();
        let url = s.ingest_url("a/b c", false);
        assert_eq!(url.as_str(), "http://database-service:8000/ingest/a%2Fb%20c");
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(HttpIngestionSink::new("not a url", "x", Duration::from_secs(1)).is_err());
        assert!(HttpIngestionSink::new("mailto:x@y", "x", Duration::from_secs(1)).is_err());
        assert!(HttpIngestionSink::new("http://h", "  ", Duration::from_secs(1)).is_err());
    }
}
