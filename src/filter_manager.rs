//! Filter reconciliation against a declarative rule file
use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::label_manager::LabelCache;
use crate::models::{Filter, RuleRow};
use crate::pacer::{PaceMode, PaceReport, Pacer};
use crate::paging::PagedLister;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Criteria for selecting live filters; every supplied field must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub to: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub query: Option<String>,
    /// Matches when the filter adds at least one of these labels
    pub add_label_ids: Vec<String>,
}

impl FilterQuery {
    pub fn is_empty(&self) -> bool {
        self.to.is_none()
            && self.from.is_none()
            && self.subject.is_none()
            && self.query.is_none()
            && self.add_label_ids.is_empty()
    }

    pub fn matches(&self, filter: &Filter) -> bool {
        fn same(wanted: &Option<String>, actual: &Option<String>) -> bool {
            wanted.is_none() || wanted == actual
        }

        let criteria = &filter.criteria;
        same(&self.to, &criteria.to)
            && same(&self.from, &criteria.from)
            && same(&self.subject, &criteria.subject)
            && same(&self.query, &criteria.query)
            && (self.add_label_ids.is_empty()
                || self
                    .add_label_ids
                    .iter()
                    .any(|id| filter.action.add_label_ids.contains(id)))
    }
}

/// Rule rows whose `from` no live filter covers, in rule-file order
pub fn diff(rows: &[RuleRow], live_froms: &[String]) -> Vec<RuleRow> {
    let live: HashSet<&str> = live_froms.iter().map(String::as_str).collect();
    rows.iter()
        .filter(|row| !live.contains(row.from.as_str()))
        .cloned()
        .collect()
}

/// Drop repeated `from` addresses, keeping the first row for each
fn dedupe_rows(rows: &[RuleRow]) -> (Vec<RuleRow>, usize) {
    let mut seen = HashSet::new();
    let unique: Vec<RuleRow> = rows
        .iter()
        .filter(|row| seen.insert(row.from.as_str()))
        .cloned()
        .collect();
    let dropped = rows.len() - unique.len();
    (unique, dropped)
}

/// Steps of one reconciliation run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    ListLiveFilters,
    ListLiveFroms,
    DiffAgainstRuleFile,
    PaceCreateMissing,
    Done,
}

/// A filter about to be created for a rule row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFilter {
    pub row: RuleRow,
    pub filter: Filter,
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub rule_rows: usize,
    pub duplicate_rows: usize,
    pub live_filters: usize,
    pub unprocessed: usize,
    /// Rows with no label name, skipped silently
    pub placeholders: Vec<RuleRow>,
    /// Rows whose label name did not resolve to exactly one label
    pub unresolved: Vec<(RuleRow, GmailError)>,
    pub creations: PaceReport<PlannedFilter, Filter>,
}

impl ReconcileReport {
    pub fn created(&self) -> usize {
        self.creations.completed()
    }

    pub fn failed(&self) -> usize {
        self.creations.failed()
    }
}

/// Lists, matches, creates and removes server-side filters
pub struct FilterReconciler {
    client: Arc<dyn GmailClient>,
    lister: PagedLister,
    pacer: Pacer,
}

impl FilterReconciler {
    pub fn new(client: Arc<dyn GmailClient>, lister: PagedLister, pacer: Pacer) -> Self {
        Self {
            client,
            lister,
            pacer,
        }
    }

    /// Every live filter, read to the end of the listing
    pub async fn list_live_filters(&self) -> Result<Vec<Filter>> {
        let client = self.client.as_ref();
        self.lister
            .collect("filters", |token| client.list_filters_page(token))
            .await
    }

    /// `from` addresses already covered by a live filter
    pub async fn list_live_froms(&self) -> Result<Vec<String>> {
        let filters = self.list_live_filters().await?;
        Ok(live_froms(&filters))
    }

    pub async fn matching(&self, query: &FilterQuery) -> Result<Vec<Filter>> {
        let filters = self.list_live_filters().await?;
        let total = filters.len();
        let matched: Vec<Filter> = filters.into_iter().filter(|f| query.matches(f)).collect();
        debug!("{} of {} filters match {:?}", matched.len(), total, query);
        Ok(matched)
    }

    /// Delete every live filter matching `query`, one per delete interval
    pub async fn remove_matching(&self, query: &FilterQuery) -> Result<PaceReport<Filter, ()>> {
        let matched = self.matching(query).await?;
        let (with_id, without_id): (Vec<Filter>, Vec<Filter>) =
            matched.into_iter().partition(|f| f.id.is_some());
        if !without_id.is_empty() {
            warn!("Skipping {} matching filters without an id", without_id.len());
        }

        info!("Removing {} filters", with_id.len());
        Ok(self
            .pacer
            .run(
                PaceMode::Delete,
                with_id,
                describe_filter,
                |filter| async move {
                    let id = filter.id.unwrap_or_default();
                    self.client.delete_filter(&id).await
                },
            )
            .await)
    }

    /// Create one filter. `Ok(None)` means the creation was a dry run.
    pub async fn add(&self, filter: Filter) -> Result<Option<Filter>> {
        if filter.criteria.is_empty() {
            return Err(GmailError::FilterError(
                "a filter needs at least one criterion".to_string(),
            ));
        }
        if filter.action.is_empty() {
            return Err(GmailError::FilterError(
                "a filter needs at least one label to add or remove".to_string(),
            ));
        }

        let name = describe_filter(&filter);
        self.pacer
            .run_one(PaceMode::Create, &name, || self.client.create_filter(&filter))
            .await
    }

    /// Create filters for every rule row not yet covered, resolving label
    /// names against a fresh label listing
    pub async fn reconcile(&self, rows: &[RuleRow]) -> Result<ReconcileReport> {
        let cache = LabelCache::load(self.client.as_ref(), &self.lister).await?;
        self.reconcile_with(rows, &cache).await
    }

    /// Create filters for every rule row not yet covered.
    ///
    /// Safe to re-run after a partial failure: rows whose filter now exists
    /// drop out of the diff.
    pub async fn reconcile_with(&self, rows: &[RuleRow], labels: &LabelCache) -> Result<ReconcileReport> {
        log_phase(ReconcilePhase::ListLiveFilters);
        let filters = self.list_live_filters().await?;

        log_phase(ReconcilePhase::ListLiveFroms);
        let froms = live_froms(&filters);
        debug!(
            "{} live filters, {} with a from address",
            filters.len(),
            froms.len()
        );

        log_phase(ReconcilePhase::DiffAgainstRuleFile);
        let (unique, duplicate_rows) = dedupe_rows(rows);
        if duplicate_rows > 0 {
            warn!(
                "Rule file repeats {} from addresses; keeping the first row of each",
                duplicate_rows
            );
        }
        let unprocessed = diff(&unique, &froms);
        info!(
            "{} of {} rule rows have no filter yet",
            unprocessed.len(),
            unique.len()
        );

        let mut placeholders = Vec::new();
        let mut unresolved = Vec::new();
        let mut planned = Vec::new();
        for row in &unprocessed {
            if row.name.is_empty() {
                debug!("Row for {} has no label, skipping", row.from);
                placeholders.push(row.clone());
                continue;
            }
            match labels.find_by_name(&row.name) {
                Ok(label) => {
                    debug!("Row {} -> label {} ({})", row.from, label.name, label.id);
                    planned.push(PlannedFilter {
                        row: row.clone(),
                        filter: Filter::archive_from(&row.from, &label.id),
                    });
                }
                Err(e) => {
                    warn!("Skipping {}: {}", row.from, e);
                    unresolved.push((row.clone(), e));
                }
            }
        }

        log_phase(ReconcilePhase::PaceCreateMissing);
        let creations = self
            .pacer
            .run(
                PaceMode::Create,
                planned,
                |p| format!("filter for emails from {}", p.row.from),
                |p| async move { self.client.create_filter(&p.filter).await },
            )
            .await;

        log_phase(ReconcilePhase::Done);
        let report = ReconcileReport {
            rule_rows: rows.len(),
            duplicate_rows,
            live_filters: filters.len(),
            unprocessed: unprocessed.len(),
            placeholders,
            unresolved,
            creations,
        };
        info!(
            "Reconciliation finished: {} created, {} failed, {} unresolved, {} placeholders",
            report.created(),
            report.failed(),
            report.unresolved.len(),
            report.placeholders.len()
        );
        Ok(report)
    }
}

fn live_froms(filters: &[Filter]) -> Vec<String> {
    filters
        .iter()
        .filter_map(|f| f.from_address().map(str::to_string))
        .collect()
}

fn log_phase(phase: ReconcilePhase) {
    debug!("Reconcile phase: {:?}", phase);
}

fn describe_filter(filter: &Filter) -> String {
    let id = filter.id.as_deref().unwrap_or("(new)");
    match filter.from_address() {
        Some(from) => format!("filter {} from {}", id, from),
        None => format!("filter {}", id),
    }
}
