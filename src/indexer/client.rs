use crate::error::IndexError;
use crate::indexer::record::IndexRecord;
use crate::events::Timestamp;
use log::{debug, warn};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Sink for processed event records
pub trait Indexer: Send + Sync {
    fn index<'a>(
        &'a self,
        record: &'a IndexRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), IndexError>> + Send + 'a>>;
}

/// Elasticsearch document writer with daily indices
///
/// Each record is POSTed to `{node}/{index}-{YYYY.MM.DD}/_doc`. Nodes are tried in
/// the configured order until one accepts the document.
pub struct ElasticsearchIndexer {
    client: Client,
    nodes: Vec<String>,
    index: String,
}

impl ElasticsearchIndexer {
    pub fn new(nodes: Vec<String>, index: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            nodes,
            index,
        }
    }

    /// Daily index name for a record timestamp
    pub fn index_name(&self, at: Timestamp) -> String {
        format!("{}-{}", self.index, at.format("%Y.%m.%d"))
    }

    /// Document endpoint on one node
    pub fn document_url(&self, node: &str, at: Timestamp) -> String {
        format!("{}/{}/_doc", node.trim_end_matches('/'), self.index_name(at))
    }

    async fn post(&self, url: &str, record: &IndexRecord) -> Result<(), IndexError> {
        let response = self.client.post(url).json(record).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl Indexer for ElasticsearchIndexer {
    fn index<'a>(
        &'a self,
        record: &'a IndexRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), IndexError>> + Send + 'a>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for node in &self.nodes {
                let url = self.document_url(node, record.processed_at);
                match self.post(&url, record).await {
                    Ok(()) => {
                        debug!("Indexed {} on {}", record.event_id, node);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("Index node {} rejected {}: {}", node, record.event_id, e);
                        failures.push(format!("{}: {}", node, e));
                    }
                }
            }
            Err(IndexError::AllNodesFailed(failures.join("; ")))
        })
    }
}
