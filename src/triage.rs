//! Spam triage: export headers, rescue likely-legitimate mail, list titles
//!
//! Every mode lists the messages under a set of labels (spam by default)
//! and then fetches each one with bounded concurrency.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::fetcher::BoundedFetcher;
use crate::label_manager::LabelCache;
use crate::models::{is_user_label_id, Message, MessageQuery, SPAM_LABEL};
use crate::pacer::{PaceMode, PaceReport, Pacer};
use crate::paging::{Page, PagedLister};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageMode {
    /// Fetch messages and collect their headers for export
    Export,
    /// Remove SPAM from messages that also carry a user label
    NotSpam,
    /// Remove SPAM from every listed message, one batch per page
    Unspamify,
    /// Subject and label names per message
    ShowTitles,
}

/// Spam that the user has also filed under one of their own labels
pub fn is_likely_not_spam(message: &Message) -> bool {
    message.has_label(SPAM_LABEL) && message.label_ids.iter().any(|id| is_user_label_id(id))
}

/// Every header name seen across `messages`, sorted and without repeats
pub fn header_union(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|m| m.headers.iter().map(|h| h.name.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// One row per message with a value for every header in `headers`.
///
/// Missing headers are empty strings; a repeated header keeps its last value.
pub fn header_rows(messages: &[Message], headers: &[String]) -> Vec<BTreeMap<String, String>> {
    messages
        .iter()
        .map(|message| {
            let mut row: BTreeMap<String, String> =
                headers.iter().map(|h| (h.clone(), String::new())).collect();
            for header in &message.headers {
                row.insert(header.name.clone(), header.value.clone());
            }
            row
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageTitle {
    pub id: String,
    pub subject: Option<String>,
    /// label id -> label name
    pub labels: BTreeMap<String, String>,
}

pub fn message_title(message: &Message, labels: &LabelCache) -> MessageTitle {
    MessageTitle {
        id: message.id.clone(),
        subject: message.subject().map(str::to_string),
        labels: labels.names_for(&message.label_ids).into_iter().collect(),
    }
}

/// Header export document
#[derive(Debug, Serialize)]
pub struct HeaderExport {
    pub exported_at: chrono::DateTime<chrono::Utc>,
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl HeaderExport {
    pub fn from_messages(messages: &[Message]) -> Self {
        let headers = header_union(messages);
        let rows = header_rows(messages, &headers);
        Self {
            exported_at: chrono::Utc::now(),
            headers,
            rows,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!("Wrote {} message header rows to {:?}", self.rows.len(), path);
        Ok(())
    }
}

#[derive(Debug)]
pub struct TriageReport {
    pub mode: TriageMode,
    pub listed: usize,
    pub messages: Vec<Message>,
    pub failed_ids: Vec<String>,
    /// Unspamify batches sent and failed
    pub unspam_batches: usize,
    pub unspam_batch_failures: usize,
    pub not_spam: Option<PaceReport<String, ()>>,
    pub titles: Vec<MessageTitle>,
}

pub struct SpamTriager {
    client: Arc<dyn GmailClient>,
    lister: PagedLister,
    fetcher: BoundedFetcher,
    pacer: Pacer,
}

impl SpamTriager {
    pub fn new(
        client: Arc<dyn GmailClient>,
        lister: PagedLister,
        fetcher: BoundedFetcher,
        pacer: Pacer,
    ) -> Self {
        Self {
            client,
            lister,
            fetcher,
            pacer,
        }
    }

    /// Run one triage mode over messages carrying all of `label_ids`
    /// (spam when empty)
    pub async fn run(&self, mode: TriageMode, label_ids: &[String]) -> Result<TriageReport> {
        let label_ids = if label_ids.is_empty() {
            vec![SPAM_LABEL.to_string()]
        } else {
            label_ids.to_vec()
        };
        info!("Triage {:?} over labels {:?}", mode, label_ids);

        let labels = if mode == TriageMode::ShowTitles {
            Some(LabelCache::load(self.client.as_ref(), &self.lister).await?)
        } else {
            None
        };

        let query = MessageQuery::labelled(label_ids);
        let batches = AtomicUsize::new(0);
        let batch_failures = AtomicUsize::new(0);
        let ids = self
            .list_ids(&query, mode == TriageMode::Unspamify, &batches, &batch_failures)
            .await?;
        info!("Listed {} messages", ids.len());

        let client = self.client.as_ref();
        let outcome = self
            .fetcher
            .fetch_all(ids.clone(), |id| async move { client.get_message(&id).await })
            .await;
        let failed_ids = outcome.failed_ids();
        if !failed_ids.is_empty() {
            warn!("{} messages could not be fetched", failed_ids.len());
        }
        let messages = outcome.fetched;

        let not_spam = if mode == TriageMode::NotSpam {
            Some(self.rescue(&messages).await)
        } else {
            None
        };

        let titles = match &labels {
            Some(cache) => messages.iter().map(|m| message_title(m, cache)).collect(),
            None => Vec::new(),
        };

        Ok(TriageReport {
            mode,
            listed: ids.len(),
            messages,
            failed_ids,
            unspam_batches: batches.into_inner(),
            unspam_batch_failures: batch_failures.into_inner(),
            not_spam,
            titles,
        })
    }

    /// Collect every listed id. With `unspamify`, each page's ids also get
    /// SPAM removed in one batch as the page arrives; a failed batch is
    /// counted and the listing carries on.
    async fn list_ids(
        &self,
        query: &MessageQuery,
        unspamify: bool,
        batches: &AtomicUsize,
        batch_failures: &AtomicUsize,
    ) -> Result<Vec<String>> {
        let client = self.client.as_ref();
        let dry_run = self.pacer.is_dry_run();
        let spam = [SPAM_LABEL.to_string()];
        let spam = &spam;

        self.lister
            .collect("messages", |token| async move {
                let page: Page<String> = client.list_messages_page(query, token).await?;
                if unspamify && !page.items.is_empty() {
                    batches.fetch_add(1, Ordering::SeqCst);
                    if dry_run {
                        info!("[dry run] would remove SPAM from {} messages", page.items.len());
                    } else if let Err(e) = client.batch_modify(&page.items, &[], spam).await {
                        batch_failures.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            "Failed to remove SPAM from {} messages: {}",
                            page.items.len(),
                            e
                        );
                    } else {
                        debug!("Removed SPAM from {} messages", page.items.len());
                    }
                }
                Ok::<_, GmailError>(page)
            })
            .await
    }

    /// Remove SPAM, one message at a time, from messages that look legitimate
    async fn rescue(&self, messages: &[Message]) -> PaceReport<String, ()> {
        let candidates: Vec<String> = messages
            .iter()
            .filter(|m| is_likely_not_spam(m))
            .map(|m| {
                info!(
                    "NOT SPAM: \"{}\" {:?}",
                    m.subject().unwrap_or_default(),
                    m.label_ids
                );
                m.id.clone()
            })
            .collect();
        info!(
            "{} of {} messages look like they are not spam",
            candidates.len(),
            messages.len()
        );

        let spam = [SPAM_LABEL.to_string()];
        let spam = &spam;
        self.pacer
            .run(
                PaceMode::Modify,
                candidates,
                |id| format!("message {}", id),
                |id| async move { self.client.modify_message(&id, &[], spam).await },
            )
            .await
    }
}
