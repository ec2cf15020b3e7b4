//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_rules::client::GmailClient;
use gmail_rules::error::{GmailError, Result};
use gmail_rules::models::{Filter, Header, Label, Message, MessageQuery, RuleRow};
use gmail_rules::paging::Page;
use gmail_rules::{PaceIntervals, Pacer, PagedLister};
use mockall::mock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn label(id: &str, name: &str) -> Label {
    Label {
        id: id.to_string(),
        name: name.to_string(),
        label_list_visibility: Some("labelShow".to_string()),
        message_list_visibility: Some("show".to_string()),
    }
}

pub fn row(from: &str, name: &str) -> RuleRow {
    RuleRow {
        from: from.to_string(),
        lowercase_name: name.to_lowercase(),
        name: name.to_string(),
    }
}

pub fn message(id: &str, labels: &[&str], from: &str, subject: &str) -> Message {
    Message {
        id: id.to_string(),
        label_ids: labels.iter().map(|s| s.to_string()).collect(),
        headers: vec![
            Header {
                name: "From".to_string(),
                value: from.to_string(),
            },
            Header {
                name: "Subject".to_string(),
                value: subject.to_string(),
            },
        ],
    }
}

pub fn http_error(status: u16, status_text: &str) -> GmailError {
    GmailError::Http {
        status,
        status_text: status_text.to_string(),
    }
}

/// Production intervals, optionally in dry-run mode
pub fn pacer(dry_run: bool) -> Pacer {
    Pacer::new(PaceIntervals::default(), dry_run)
}

/// Short intervals for tests that do not measure pacing
pub fn quick_pacer() -> Pacer {
    Pacer::new(
        PaceIntervals {
            create: Duration::from_millis(10),
            update: Duration::from_millis(10),
            delete: Duration::from_millis(10),
            modify: Duration::from_millis(10),
        },
        false,
    )
}

pub fn lister() -> PagedLister {
    PagedLister::default()
}

/// Mutable account state behind [`FakeGmail`]
#[derive(Debug, Default)]
pub struct FakeState {
    pub filters: Vec<Filter>,
    pub labels: Vec<Label>,
    pub messages: Vec<Message>,
    /// Items per listing page; 0 returns everything in one page
    pub page_size: usize,
    next_id: usize,

    pub create_filter_calls: usize,
    pub delete_filter_calls: Vec<String>,
    pub update_label_calls: Vec<Label>,
    pub delete_label_calls: Vec<String>,
    pub batch_modify_calls: Vec<(Vec<String>, Vec<String>, Vec<String>)>,
    pub modify_calls: Vec<String>,

    /// Filter creations for these from addresses fail with HTTP 500
    pub fail_create_for: HashSet<String>,
    /// Label updates fail with HTTP 503 while set
    pub fail_update_label: bool,
    /// Message fetches for these ids fail with HTTP 500
    pub fail_get_message: HashSet<String>,
    /// The next label delete turns this file into a directory, so saving it fails
    pub block_file_on_delete: Option<PathBuf>,
}

/// In-memory Gmail account for stateful scenarios
#[derive(Debug, Default)]
pub struct FakeGmail {
    pub state: Mutex<FakeState>,
}

impl FakeGmail {
    pub fn new(filters: Vec<Filter>, labels: Vec<Label>, messages: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                filters,
                labels,
                messages,
                ..Default::default()
            }),
        })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn label_named(&self, id: &str) -> Option<String> {
        self.with_state(|s| s.labels.iter().find(|l| l.id == id).map(|l| l.name.clone()))
    }
}

fn page_of<T: Clone>(items: &[T], page_size: usize, token: Option<String>) -> Page<T> {
    if page_size == 0 {
        return Page::last(items.to_vec());
    }
    let start: usize = token
        .and_then(|t| t.parse().ok())
        .unwrap_or(0)
        .min(items.len());
    let end = (start + page_size).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    Page::new(items[start..end].to_vec(), next)
}

/// Supports `from:<address>` and `label:inbox` terms
fn matches_search(message: &Message, q: &str) -> bool {
    q.split_whitespace().all(|term| {
        if let Some(from) = term.strip_prefix("from:") {
            message.header("From").is_some_and(|v| v.contains(from))
        } else if let Some(label) = term.strip_prefix("label:") {
            message.has_label(&label.to_uppercase())
        } else {
            true
        }
    })
}

#[async_trait]
impl GmailClient for FakeGmail {
    async fn list_filters_page(&self, page_token: Option<String>) -> Result<Page<Filter>> {
        Ok(self.with_state(|s| page_of(&s.filters, s.page_size, page_token)))
    }

    async fn get_filter(&self, filter_id: &str) -> Result<Filter> {
        self.with_state(|s| {
            s.filters
                .iter()
                .find(|f| f.id.as_deref() == Some(filter_id))
                .cloned()
                .ok_or_else(|| http_error(404, "Not Found"))
        })
    }

    async fn create_filter(&self, filter: &Filter) -> Result<Filter> {
        self.with_state(|s| {
            s.create_filter_calls += 1;
            if let Some(from) = filter.from_address() {
                if s.fail_create_for.contains(from) {
                    return Err(http_error(500, "Internal Server Error"));
                }
            }
            s.next_id += 1;
            let created = Filter {
                id: Some(format!("filter-{}", s.next_id)),
                ..filter.clone()
            };
            s.filters.push(created.clone());
            Ok(created)
        })
    }

    async fn delete_filter(&self, filter_id: &str) -> Result<()> {
        self.with_state(|s| {
            s.delete_filter_calls.push(filter_id.to_string());
            let before = s.filters.len();
            s.filters.retain(|f| f.id.as_deref() != Some(filter_id));
            if s.filters.len() == before {
                return Err(http_error(404, "Not Found"));
            }
            Ok(())
        })
    }

    async fn list_labels_page(&self, page_token: Option<String>) -> Result<Page<Label>> {
        Ok(self.with_state(|s| page_of(&s.labels, s.page_size, page_token)))
    }

    async fn get_label(&self, label_id: &str) -> Result<Label> {
        self.with_state(|s| {
            s.labels
                .iter()
                .find(|l| l.id == label_id)
                .cloned()
                .ok_or_else(|| http_error(404, "Not Found"))
        })
    }

    async fn update_label(&self, label: &Label) -> Result<Label> {
        self.with_state(|s| {
            s.update_label_calls.push(label.clone());
            if s.fail_update_label {
                return Err(http_error(503, "Service Unavailable"));
            }
            match s.labels.iter_mut().find(|l| l.id == label.id) {
                Some(existing) => {
                    *existing = label.clone();
                    Ok(label.clone())
                }
                None => Err(http_error(404, "Not Found")),
            }
        })
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        self.with_state(|s| {
            s.delete_label_calls.push(label_id.to_string());
            if let Some(path) = s.block_file_on_delete.take() {
                let _ = std::fs::remove_file(&path);
                std::fs::create_dir_all(&path).unwrap();
            }
            let before = s.labels.len();
            s.labels.retain(|l| l.id != label_id);
            if s.labels.len() == before {
                return Err(http_error(404, "Not Found"));
            }
            Ok(())
        })
    }

    async fn list_messages_page(
        &self,
        query: &MessageQuery,
        page_token: Option<String>,
    ) -> Result<Page<String>> {
        self.with_state(|s| {
            let ids: Vec<String> = s
                .messages
                .iter()
                .filter(|m| query.label_ids.iter().all(|l| m.has_label(l)))
                .filter(|m| query.q.as_deref().map_or(true, |q| matches_search(m, q)))
                .map(|m| m.id.clone())
                .collect();
            Ok(page_of(&ids, s.page_size, page_token))
        })
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.with_state(|s| {
            if s.fail_get_message.contains(message_id) {
                return Err(http_error(500, "Internal Server Error"));
            }
            s.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| http_error(404, "Not Found"))
        })
    }

    async fn batch_modify(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.with_state(|s| {
            s.batch_modify_calls.push((
                message_ids.to_vec(),
                add_label_ids.to_vec(),
                remove_label_ids.to_vec(),
            ));
            for message in s.messages.iter_mut().filter(|m| message_ids.contains(&m.id)) {
                apply_labels(message, add_label_ids, remove_label_ids);
            }
            Ok(())
        })
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.with_state(|s| {
            s.modify_calls.push(message_id.to_string());
            match s.messages.iter_mut().find(|m| m.id == message_id) {
                Some(message) => {
                    apply_labels(message, add_label_ids, remove_label_ids);
                    Ok(())
                }
                None => Err(http_error(404, "Not Found")),
            }
        })
    }

    async fn profile_address(&self) -> Result<String> {
        Ok("me@example.com".to_string())
    }
}

fn apply_labels(message: &mut Message, add: &[String], remove: &[String]) {
    message.label_ids.retain(|l| !remove.contains(l));
    for id in add {
        if !message.label_ids.contains(id) {
            message.label_ids.push(id.clone());
        }
    }
}

// Mock implementation of GmailClient for call-count expectations
mock! {
    pub Gmail {}

    #[async_trait]
    impl GmailClient for Gmail {
        async fn list_filters_page(&self, page_token: Option<String>) -> Result<Page<Filter>>;
        async fn get_filter(&self, filter_id: &str) -> Result<Filter>;
        async fn create_filter(&self, filter: &Filter) -> Result<Filter>;
        async fn delete_filter(&self, filter_id: &str) -> Result<()>;
        async fn list_labels_page(&self, page_token: Option<String>) -> Result<Page<Label>>;
        async fn get_label(&self, label_id: &str) -> Result<Label>;
        async fn update_label(&self, label: &Label) -> Result<Label>;
        async fn delete_label(&self, label_id: &str) -> Result<()>;
        async fn list_messages_page(
            &self,
            query: &MessageQuery,
            page_token: Option<String>,
        ) -> Result<Page<String>>;
        async fn get_message(&self, message_id: &str) -> Result<Message>;
        async fn batch_modify(
            &self,
            message_ids: &[String],
            add_label_ids: &[String],
            remove_label_ids: &[String],
        ) -> Result<()>;
        async fn modify_message(
            &self,
            message_id: &str,
            add_label_ids: &[String],
            remove_label_ids: &[String],
        ) -> Result<()>;
        async fn profile_address(&self) -> Result<String>;
    }
}
