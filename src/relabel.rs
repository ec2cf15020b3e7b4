//! Retroactive application of a filter to mail already in the inbox

use std::sync::Arc;
use tracing::{debug, info};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::models::{Filter, MessageQuery};
use crate::pacer::{PaceMode, Pacer};
use crate::paging::PagedLister;

/// Search matching inbox mail from `from`
pub fn inbox_query(from: &str) -> String {
    format!("from:{} label:inbox", from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelabelReport {
    pub filter_id: String,
    pub query: String,
    pub matched: usize,
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
    /// False when nothing matched or the run was a dry run
    pub applied: bool,
}

pub struct BulkRelabeler {
    client: Arc<dyn GmailClient>,
    lister: PagedLister,
    pacer: Pacer,
}

impl BulkRelabeler {
    pub fn new(client: Arc<dyn GmailClient>, lister: PagedLister, pacer: Pacer) -> Self {
        Self {
            client,
            lister,
            pacer,
        }
    }

    /// Apply a filter's action to every inbox message it would have caught.
    ///
    /// All matching ids are collected first; then a single batch-modify
    /// carries the whole change. No match means no mutation at all.
    pub async fn apply(&self, filter_id: &str) -> Result<RelabelReport> {
        let filter = self.client.get_filter(filter_id).await?;
        let from = filter.from_address().ok_or_else(|| {
            GmailError::FilterError(format!(
                "filter {} has no from criterion to search by",
                filter_id
            ))
        })?;
        if filter.action.is_empty() {
            return Err(GmailError::FilterError(format!(
                "filter {} has no label action to apply",
                filter_id
            )));
        }

        let query = inbox_query(from);
        let ids = self.matching_ids(&query).await?;
        info!("Filter {} matches {} inbox messages", filter_id, ids.len());

        let mut report = RelabelReport {
            filter_id: filter_id.to_string(),
            query,
            matched: ids.len(),
            add_label_ids: filter.action.add_label_ids.clone(),
            remove_label_ids: filter.action.remove_label_ids.clone(),
            applied: false,
        };
        if ids.is_empty() {
            return Ok(report);
        }

        report.applied = self.batch_apply(&filter, &ids).await?;
        Ok(report)
    }

    async fn matching_ids(&self, query: &str) -> Result<Vec<String>> {
        let search = MessageQuery::search(query);
        let client = self.client.as_ref();
        let search = &search;
        self.lister
            .collect("messages", |token| client.list_messages_page(search, token))
            .await
    }

    async fn batch_apply(&self, filter: &Filter, ids: &[String]) -> Result<bool> {
        let name = format!("{} messages", ids.len());
        debug!(
            "Batch modify: +{:?} -{:?} on {}",
            filter.action.add_label_ids, filter.action.remove_label_ids, name
        );
        let applied = self
            .pacer
            .run_one(PaceMode::Modify, &name, || {
                self.client.batch_modify(
                    ids,
                    &filter.action.add_label_ids,
                    &filter.action.remove_label_ids,
                )
            })
            .await?;
        Ok(applied.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_query() {
        assert_eq!(
            inbox_query("news@example.com"),
            "from:news@example.com label:inbox"
        );
    }
}
