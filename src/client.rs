//! Gmail API client with bounded in-flight requests, timeouts and retries

use async_trait::async_trait;
use google_gmail1::api;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{Filter, FilterAction, FilterCriteria, Header, Label, Message, MessageQuery};
use crate::paging::Page;

const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
const SCOPE_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";
const SCOPE_SETTINGS: &str = "https://www.googleapis.com/auth/gmail.settings.basic";

/// Largest id list Gmail accepts in one batchModify request
pub const BATCH_MODIFY_LIMIT: usize = 1000;

/// Remote operations the engine needs from Gmail
///
/// Listing calls return one page at a time; `PagedLister` drives them to
/// completion. Failures carry the remote status code and text.
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// One page of the account's filters
    async fn list_filters_page(&self, page_token: Option<String>) -> Result<Page<Filter>>;

    async fn get_filter(&self, filter_id: &str) -> Result<Filter>;

    /// Create a filter, returning it with its server-assigned id
    async fn create_filter(&self, filter: &Filter) -> Result<Filter>;

    async fn delete_filter(&self, filter_id: &str) -> Result<()>;

    /// One page of the account's labels, system labels included
    async fn list_labels_page(&self, page_token: Option<String>) -> Result<Page<Label>>;

    async fn get_label(&self, label_id: &str) -> Result<Label>;

    /// Replace the label stored under `label.id`
    async fn update_label(&self, label: &Label) -> Result<Label>;

    async fn delete_label(&self, label_id: &str) -> Result<()>;

    /// One page of message ids matching `query`
    async fn list_messages_page(
        &self,
        query: &MessageQuery,
        page_token: Option<String>,
    ) -> Result<Page<String>>;

    /// Message label ids and headers
    async fn get_message(&self, message_id: &str) -> Result<Message>;

    /// Apply the same label change to every id in one logical call
    async fn batch_modify(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// Label change on a single message
    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// Address of the authenticated mailbox
    async fn profile_address(&self) -> Result<String>;
}

/// Limits applied to every remote call
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Requests allowed in flight at once
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// `maxResults` for message listings
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            page_size: 500,
        }
    }
}

/// Gmail client backed by the generated `google-gmail1` hub
pub struct ProductionGmailClient {
    hub: GmailHub,
    permits: Arc<Semaphore>,
    options: ClientOptions,
}

impl ProductionGmailClient {
    pub fn new(hub: GmailHub, options: ClientOptions) -> Self {
        Self {
            hub,
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            options,
        }
    }

    /// Run one API call under a permit, with a timeout per attempt and
    /// retries for transient failures
    async fn execute<T, F, Fut>(&self, operation_name: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        let _permit = self.permits.acquire().await.map_err(|e| {
            GmailError::ApiError(format!("Failed to acquire request permit: {}", e))
        })?;

        let timeout = self.options.request_timeout;
        with_retry(operation_name, self.options.max_retries, || {
            let request = call();
            async move {
                match tokio::time::timeout(timeout, request).await {
                    Ok(result) => result.map_err(GmailError::from),
                    Err(_) => {
                        warn!("Gmail API {} call timed out after {:?}", operation_name, timeout);
                        Err(GmailError::NetworkError(format!(
                            "API call timed out after {:?}",
                            timeout
                        )))
                    }
                }
            }
        })
        .await
    }
}

/// Execute an async operation with exponential backoff retry.
///
/// Only transient errors are retried. The delay doubles from 1s up to 30s; a
/// 429 waits at least as long as the server's `Retry-After`.
pub(crate) async fn with_retry<T, F, Fut>(
    operation_name: &str,
    max_retries: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempts <= max_retries => {
                let wait = match &e {
                    GmailError::RateLimitExceeded { retry_after } => {
                        delay.max(Duration::from_secs(*retry_after))
                    }
                    _ => delay,
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempts,
                    max_retries + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
            Err(e) => return Err(e),
        }
    }
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

fn filter_to_api(filter: &Filter) -> api::Filter {
    api::Filter {
        id: None,
        criteria: Some(api::FilterCriteria {
            from: filter.criteria.from.clone(),
            to: filter.criteria.to.clone(),
            subject: filter.criteria.subject.clone(),
            query: filter.criteria.query.clone(),
            ..Default::default()
        }),
        action: Some(api::FilterAction {
            add_label_ids: non_empty(&filter.action.add_label_ids),
            remove_label_ids: non_empty(&filter.action.remove_label_ids),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn filter_from_api(filter: api::Filter) -> Filter {
    let criteria = filter.criteria.unwrap_or_default();
    let action = filter.action.unwrap_or_default();
    Filter {
        id: filter.id,
        criteria: FilterCriteria {
            to: criteria.to,
            from: criteria.from,
            subject: criteria.subject,
            query: criteria.query,
        },
        action: FilterAction {
            add_label_ids: action.add_label_ids.unwrap_or_default(),
            remove_label_ids: action.remove_label_ids.unwrap_or_default(),
        },
    }
}

fn label_from_api(label: api::Label) -> Result<Label> {
    match (label.id, label.name) {
        (Some(id), Some(name)) => Ok(Label {
            id,
            name,
            label_list_visibility: label.label_list_visibility,
            message_list_visibility: label.message_list_visibility,
        }),
        (id, _) => Err(GmailError::ApiError(format!(
            "Label {} returned without id or name",
            id.unwrap_or_default()
        ))),
    }
}

fn label_to_api(label: &Label) -> api::Label {
    api::Label {
        id: Some(label.id.clone()),
        name: Some(label.name.clone()),
        label_list_visibility: label.label_list_visibility.clone(),
        message_list_visibility: label.message_list_visibility.clone(),
        ..Default::default()
    }
}

fn message_from_api(message: api::Message) -> Result<Message> {
    let id = message
        .id
        .ok_or_else(|| GmailError::ApiError("Message returned without id".to_string()))?;
    let headers = message
        .payload
        .and_then(|payload| payload.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| match (h.name, h.value) {
            (Some(name), Some(value)) => Some(Header { name, value }),
            _ => None,
        })
        .collect();

    Ok(Message {
        id,
        label_ids: message.label_ids.unwrap_or_default(),
        headers,
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_filters_page(&self, page_token: Option<String>) -> Result<Page<Filter>> {
        if page_token.is_some() {
            debug!("Filter listing is not paginated, ignoring cursor");
        }
        let (_, response) = self
            .execute("list_filters", || {
                self.hub
                    .users()
                    .settings_filters_list("me")
                    .add_scope(SCOPE_SETTINGS)
                    .doit()
            })
            .await?;

        let filters = response
            .filter
            .unwrap_or_default()
            .into_iter()
            .map(filter_from_api)
            .collect();
        Ok(Page::last(filters))
    }

    async fn get_filter(&self, filter_id: &str) -> Result<Filter> {
        let (_, filter) = self
            .execute("get_filter", || {
                self.hub
                    .users()
                    .settings_filters_get("me", filter_id)
                    .add_scope(SCOPE_SETTINGS)
                    .doit()
            })
            .await?;
        Ok(filter_from_api(filter))
    }

    async fn create_filter(&self, filter: &Filter) -> Result<Filter> {
        let request = filter_to_api(filter);
        let (_, created) = self
            .execute("create_filter", || {
                self.hub
                    .users()
                    .settings_filters_create(request.clone(), "me")
                    .add_scope(SCOPE_SETTINGS)
                    .doit()
            })
            .await?;
        Ok(filter_from_api(created))
    }

    async fn delete_filter(&self, filter_id: &str) -> Result<()> {
        self.execute("delete_filter", || {
            self.hub
                .users()
                .settings_filters_delete("me", filter_id)
                .add_scope(SCOPE_SETTINGS)
                .doit()
        })
        .await?;
        Ok(())
    }

    async fn list_labels_page(&self, page_token: Option<String>) -> Result<Page<Label>> {
        if page_token.is_some() {
            debug!("Label listing is not paginated, ignoring cursor");
        }
        let (_, response) = self
            .execute("list_labels", || {
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope(SCOPE_LABELS)
                    .doit()
            })
            .await?;

        let labels = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(label_from_api)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::last(labels))
    }

    async fn get_label(&self, label_id: &str) -> Result<Label> {
        let (_, label) = self
            .execute("get_label", || {
                self.hub
                    .users()
                    .labels_get("me", label_id)
                    .add_scope(SCOPE_LABELS)
                    .doit()
            })
            .await?;
        label_from_api(label)
    }

    async fn update_label(&self, label: &Label) -> Result<Label> {
        let request = label_to_api(label);
        let (_, updated) = self
            .execute("update_label", || {
                self.hub
                    .users()
                    .labels_update(request.clone(), "me", &label.id)
                    .add_scope(SCOPE_LABELS)
                    .doit()
            })
            .await?;
        label_from_api(updated)
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        self.execute("delete_label", || {
            self.hub
                .users()
                .labels_delete("me", label_id)
                .add_scope(SCOPE_LABELS)
                .doit()
        })
        .await?;
        Ok(())
    }

    async fn list_messages_page(
        &self,
        query: &MessageQuery,
        page_token: Option<String>,
    ) -> Result<Page<String>> {
        let (_, response) = self
            .execute("list_messages", || {
                let mut call = self
                    .hub
                    .users()
                    .messages_list("me")
                    .max_results(self.options.page_size)
                    .include_spam_trash(query.include_spam_trash);
                if let Some(q) = query.q.as_deref() {
                    call = call.q(q);
                }
                for label_id in &query.label_ids {
                    call = call.add_label_ids(label_id);
                }
                if let Some(token) = page_token.as_deref() {
                    call = call.page_token(token);
                }
                call.add_scope(SCOPE_MODIFY).doit()
            })
            .await?;

        let ids = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();
        Ok(Page::new(ids, response.next_page_token))
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        let (_, message) = self
            .execute("get_message", || {
                self.hub
                    .users()
                    .messages_get("me", message_id)
                    .format("metadata")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
            })
            .await?;
        message_from_api(message)
    }

    async fn batch_modify(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        for chunk in message_ids.chunks(BATCH_MODIFY_LIMIT) {
            let request = api::BatchModifyMessagesRequest {
                ids: Some(chunk.to_vec()),
                add_label_ids: non_empty(add_label_ids),
                remove_label_ids: non_empty(remove_label_ids),
            };
            self.execute("batch_modify", || {
                self.hub
                    .users()
                    .messages_batch_modify(request.clone(), "me")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
            })
            .await?;
            debug!("Batch-modified {} messages", chunk.len());
        }
        Ok(())
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let request = api::ModifyMessageRequest {
            add_label_ids: non_empty(add_label_ids),
            remove_label_ids: non_empty(remove_label_ids),
        };
        self.execute("modify_message", || {
            self.hub
                .users()
                .messages_modify(request.clone(), "me", message_id)
                .add_scope(SCOPE_MODIFY)
                .doit()
        })
        .await?;
        Ok(())
    }

    async fn profile_address(&self) -> Result<String> {
        let (_, profile) = self
            .execute("get_profile", || {
                self.hub
                    .users()
                    .get_profile("me")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
            })
            .await?;
        profile
            .email_address
            .ok_or_else(|| GmailError::ApiError("Profile has no email address".to_string()))
    }
}
