//! Gmail Rules
//!
//! Keeps a Gmail account's server-side filters and labels in line with a
//! declarative rule file, and runs bulk relabeling and spam triage against
//! the account.
//!
//! # Overview
//!
//! - **Reconciliation**: create the archive-and-label filters a rule file asks
//!   for, skipping every `from` address a live filter already covers
//! - **Labels**: rename, merge (journaled, resumable), bulk rename and delete
//! - **Relabeling**: apply an existing filter to mail already in the inbox
//! - **Spam triage**: header export, not-spam rescue, unspamify, titles
//!
//! Every listing goes through [`paging::PagedLister`], every per-message fetch
//! through [`fetcher::BoundedFetcher`], and every mutation through
//! [`pacer::Pacer`].
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_rules::{auth, client::ProductionGmailClient, config::Config};
//! use gmail_rules::{FilterReconciler, GmailClient, PagedLister, Pacer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-rules/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client: Arc<dyn GmailClient> =
//!         Arc::new(ProductionGmailClient::new(hub, config.client_options()));
//!
//!     let rows = gmail_rules::rules::read_rule_file("rules.tsv".as_ref()).await?;
//!     let reconciler = FilterReconciler::new(
//!         client,
//!         PagedLister::new(config.execution.max_pages),
//!         Pacer::from_config(&config),
//!     );
//!     let report = reconciler.reconcile(&rows).await?;
//!     println!("{} filters created", report.created());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API client trait and retrying production client
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`fetcher`] - Bounded-concurrency per-message fetching
//! - [`filter_manager`] - Filter matching and rule-file reconciliation
//! - [`journal`] - Persistent record of label merges in progress
//! - [`label_manager`] - Label cache, rename and merge
//! - [`models`] - Core data structures
//! - [`pacer`] - Scheduled, rate-limited mutations
//! - [`paging`] - Cursor-following listing
//! - [`rate_limiter`] - Token-bucket mutation budget
//! - [`relabel`] - Retroactive filter application
//! - [`rules`] - Rule file parsing
//! - [`triage`] - Spam triage modes

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter_manager;
pub mod journal;
pub mod label_manager;
pub mod models;
pub mod pacer;
pub mod paging;
pub mod rate_limiter;
pub mod relabel;
pub mod rules;
pub mod triage;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{Filter, FilterAction, FilterCriteria, Label, Message, MessageQuery, RuleRow};

// Config types
pub use config::{Config, ExecutionConfig, FetchConfig, PacingConfig, PathsConfig};

// Client traits
pub use client::{ClientOptions, GmailClient, ProductionGmailClient};

// Listing, fetching and pacing
pub use fetcher::{BoundedFetcher, FetchOutcome};
pub use pacer::{PaceIntervals, PaceMode, PaceReport, Pacer, TaskOutcome};
pub use paging::{Page, PagedLister};
pub use rate_limiter::QuotaRateLimiter;

// Components
pub use filter_manager::{FilterQuery, FilterReconciler, ReconcileReport};
pub use journal::{MergeJournal, MergePhase, MergeRecord};
pub use label_manager::{LabelCache, LabelMerger, RenameOutcome, RenameRequest};
pub use relabel::{BulkRelabeler, RelabelReport};
pub use triage::{SpamTriager, TriageMode, TriageReport};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
