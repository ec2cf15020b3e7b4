use serde::{Deserialize, Serialize};

/// System label carried by every message still in the inbox
pub const INBOX_LABEL: &str = "INBOX";

/// System label marking a message as spam
pub const SPAM_LABEL: &str = "SPAM";

/// Id prefix Gmail assigns to user-defined labels; every other id is a system label
pub const USER_LABEL_PREFIX: &str = "Label_";

/// Returns true for ids of user-defined labels
pub fn is_user_label_id(id: &str) -> bool {
    id.starts_with(USER_LABEL_PREFIX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.to.is_none() && self.from.is_none() && self.subject.is_none() && self.query.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAction {
    #[serde(default)]
    pub add_label_ids: Vec<String>,
    #[serde(default)]
    pub remove_label_ids: Vec<String>,
}

impl FilterAction {
    pub fn is_empty(&self) -> bool {
        self.add_label_ids.is_empty() && self.remove_label_ids.is_empty()
    }
}

/// A server-side mail filter. `id` is assigned by Gmail on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub action: FilterAction,
}

impl Filter {
    /// Filter that files mail from `from` under `label_id` and skips the inbox
    pub fn archive_from(from: &str, label_id: &str) -> Self {
        Self {
            id: None,
            criteria: FilterCriteria {
                from: Some(from.to_string()),
                ..Default::default()
            },
            action: FilterAction {
                add_label_ids: vec![label_id.to_string()],
                remove_label_ids: vec![INBOX_LABEL.to_string()],
            },
        }
    }

    pub fn from_address(&self) -> Option<&str> {
        self.criteria.from.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_list_visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_list_visibility: Option<String>,
}

impl Label {
    pub fn is_user_label(&self) -> bool {
        is_user_label_id(&self.id)
    }

    /// Same label (id and visibility) under a different name
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl Message {
    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|l| l == label_id)
    }
}

/// One row of the declarative rule file: mail from `from` belongs under label `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    pub from: String,
    pub lowercase_name: String,
    pub name: String,
}

/// Narrowing applied to a message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub q: Option<String>,
    pub label_ids: Vec<String>,
    pub include_spam_trash: bool,
}

impl MessageQuery {
    pub fn search(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Default::default()
        }
    }

    /// Every message carrying all of `label_ids`, spam and trash included
    pub fn labelled(label_ids: Vec<String>) -> Self {
        Self {
            q: None,
            label_ids,
            include_spam_trash: true,
        }
    }
}
