//! Label lookup, renaming and merging
use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::journal::{MergeJournal, MergePhase, MergeRecord};
use crate::models::Label;
use crate::pacer::{PaceMode, PaceReport, Pacer};
use crate::paging::PagedLister;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Snapshot of every label in the account, taken once per command
///
/// Never updated after loading; a command that renames or deletes labels
/// keeps resolving against the state it started from.
#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    labels: Vec<Label>,
    by_id: HashMap<String, usize>,
}

impl LabelCache {
    pub fn new(labels: Vec<Label>) -> Self {
        let by_id = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.id.clone(), i))
            .collect();
        Self { labels, by_id }
    }

    /// Build the cache from a complete label listing
    pub async fn load(client: &dyn GmailClient, lister: &PagedLister) -> Result<Self> {
        let labels = lister
            .collect("labels", |token| client.list_labels_page(token))
            .await?;
        info!("Loaded {} labels into cache", labels.len());
        Ok(Self::new(labels))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Label> {
        self.by_id.get(id).map(|&i| &self.labels[i])
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|l| l.name.as_str())
    }

    /// The single label named exactly `name`.
    ///
    /// Two labels sharing a name is reported as [`GmailError::AmbiguousLabel`]
    /// rather than picking one.
    pub fn find_by_name(&self, name: &str) -> Result<&Label> {
        let matches: Vec<&Label> = self.labels.iter().filter(|l| l.name == name).collect();
        match matches.as_slice() {
            [] => Err(GmailError::LabelNotFound(name.to_string())),
            [label] => Ok(label),
            many => Err(GmailError::AmbiguousLabel {
                name: name.to_string(),
                ids: many.iter().map(|l| l.id.clone()).collect(),
            }),
        }
    }

    pub fn user_labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(|l| l.is_user_label())
    }

    /// User labels whose name contains `pattern`
    pub fn matching(&self, pattern: &str) -> Vec<&Label> {
        self.user_labels()
            .filter(|l| l.name.contains(pattern))
            .collect()
    }

    /// id -> name for each id, falling back to the id for unknown labels
    pub fn names_for(&self, ids: &[String]) -> Vec<(String, String)> {
        ids.iter()
            .map(|id| {
                let name = self.name_of(id).unwrap_or(id).to_string();
                (id.clone(), name)
            })
            .collect()
    }
}

/// Replace the first literal occurrence of `pattern` in `name`.
///
/// No pattern, or an empty one, leaves the name untouched.
pub fn substitute_first(name: &str, pattern: Option<&str>, replacement: &str) -> String {
    match pattern {
        Some(p) if !p.is_empty() => name.replacen(p, replacement, 1),
        _ => name.to_string(),
    }
}

/// Arguments of a `labels rename` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameRequest {
    pub source: String,
    pub target: Option<String>,
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub replacement: String,
}

/// What a [`RenameRequest`] asks for; `name` wins over `target`, which wins
/// over a bare `pattern`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelChange {
    Rename { name: String },
    Merge { target: String },
    Substitute,
    NoChange,
}

impl RenameRequest {
    pub fn plan(&self) -> LabelChange {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return LabelChange::Rename {
                name: name.to_string(),
            };
        }
        if let Some(target) = self.target.as_deref().filter(|t| !t.is_empty()) {
            return LabelChange::Merge {
                target: target.to_string(),
            };
        }
        if self.pattern.as_deref().is_some_and(|p| !p.is_empty()) {
            return LabelChange::Substitute;
        }
        LabelChange::NoChange
    }

    fn substitute(&self, name: &str) -> String {
        substitute_first(name, self.pattern.as_deref(), &self.replacement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    /// Nothing to do
    NoChange,
    Renamed {
        label_id: String,
        from: String,
        to: String,
        applied: bool,
    },
    Merged {
        label_id: String,
        from: String,
        to: String,
        deleted_target_id: String,
        merge_id: Option<String>,
        applied: bool,
    },
}

#[derive(Debug, Default)]
pub struct RepairReport {
    pub completed: Vec<MergeRecord>,
    pub failed: Vec<(MergeRecord, GmailError)>,
}

/// Renames and merges labels, pacing every write
pub struct LabelMerger {
    client: Arc<dyn GmailClient>,
    lister: PagedLister,
    pacer: Pacer,
    journal_path: PathBuf,
}

impl LabelMerger {
    pub fn new(
        client: Arc<dyn GmailClient>,
        lister: PagedLister,
        pacer: Pacer,
        journal_path: PathBuf,
    ) -> Self {
        Self {
            client,
            lister,
            pacer,
            journal_path,
        }
    }

    pub async fn load_cache(&self) -> Result<LabelCache> {
        LabelCache::load(self.client.as_ref(), &self.lister).await
    }

    /// The labels with the given ids, or every user label when `ids` is empty
    pub async fn show(&self, ids: &[String]) -> Result<Vec<Label>> {
        let cache = self.load_cache().await?;
        let labels = if ids.is_empty() {
            cache.user_labels().cloned().collect()
        } else {
            ids.iter().filter_map(|id| cache.get(id).cloned()).collect()
        };
        Ok(labels)
    }

    async fn fetch_user_label(&self, id: &str) -> Result<Label> {
        let label = self.client.get_label(id).await?;
        debug!("Fetched label {}: {}", label.id, label.name);
        if !label.is_user_label() {
            return Err(GmailError::LabelError(format!(
                "'{}' ({}) is a system label and cannot be renamed or deleted",
                label.name, label.id
            )));
        }
        Ok(label)
    }

    /// Apply a rename request: rename in place, merge, or substitute
    pub async fn rename(&self, request: &RenameRequest) -> Result<RenameOutcome> {
        let change = request.plan();
        if change == LabelChange::NoChange {
            info!("No changes have been specified");
            return Ok(RenameOutcome::NoChange);
        }

        let source = self.fetch_user_label(&request.source).await?;
        match change {
            LabelChange::Rename { name } => {
                let final_name = request.substitute(&name);
                self.rename_in_place(source, final_name).await
            }
            LabelChange::Merge { target } => {
                let target = self.fetch_user_label(&target).await?;
                let final_name = request.substitute(&target.name);
                self.merge(source, target, final_name).await
            }
            LabelChange::Substitute => {
                let final_name = request.substitute(&source.name);
                self.rename_in_place(source, final_name).await
            }
            LabelChange::NoChange => Ok(RenameOutcome::NoChange),
        }
    }

    async fn rename_in_place(&self, source: Label, final_name: String) -> Result<RenameOutcome> {
        if source.name == final_name {
            info!("Label {} is already named '{}'", source.id, final_name);
            return Ok(RenameOutcome::NoChange);
        }

        info!("Renaming label '{}' to '{}'", source.name, final_name);
        let renamed = source.renamed(&final_name);
        let applied = self
            .pacer
            .run_one(PaceMode::Update, &source.id, || {
                self.client.update_label(&renamed)
            })
            .await?
            .is_some();

        Ok(RenameOutcome::Renamed {
            label_id: source.id,
            from: source.name,
            to: final_name,
            applied,
        })
    }

    /// Collapse `target` into `source`: delete the target, then give the
    /// source the final name.
    ///
    /// Each phase is journaled before the next remote call. A failure after
    /// the delete returns [`GmailError::MergeStranded`]; `repair` finishes it.
    pub async fn merge(&self, source: Label, target: Label, final_name: String) -> Result<RenameOutcome> {
        if source.id == target.id {
            return Err(GmailError::LabelError(format!(
                "Cannot merge label {} into itself",
                source.id
            )));
        }

        info!(
            "Label '{}' ({}) will be renamed to '{}'; target '{}' ({}) will be deleted",
            source.name, source.id, final_name, target.name, target.id
        );

        if self.pacer.is_dry_run() {
            self.pacer
                .run_one(PaceMode::Delete, &target.id, || async { Ok(()) })
                .await?;
            self.pacer
                .run_one(PaceMode::Update, &source.id, || async { Ok(()) })
                .await?;
            return Ok(RenameOutcome::Merged {
                label_id: source.id,
                from: source.name,
                to: final_name,
                deleted_target_id: target.id,
                merge_id: None,
                applied: false,
            });
        }

        let mut journal = MergeJournal::load(&self.journal_path).await?;
        let record = journal.begin(&source, &target, &final_name).await?;

        let deleted = self
            .pacer
            .run_one(PaceMode::Delete, &target.id, || {
                self.client.delete_label(&target.id)
            })
            .await;
        match deleted {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!("Target label {} was already deleted", target.id);
            }
            Err(e) => {
                journal.record_failure(&record.merge_id, &e).await?;
                return Err(e);
            }
        }

        // Past this point the target is gone; any failure strands the merge
        let renamed = source.renamed(&final_name);
        let finished: Result<()> = async {
            journal.advance(&record.merge_id, MergePhase::Deleted).await?;
            journal
                .advance(&record.merge_id, MergePhase::PendingUpdate)
                .await?;
            self.pacer
                .run_one(PaceMode::Update, &source.id, || {
                    self.client.update_label(&renamed)
                })
                .await?;
            Ok(())
        }
        .await;
        if let Err(e) = finished {
            error!(
                "Merge {} stranded: target {} deleted but source {} not renamed to '{}': {}",
                record.merge_id, target.id, source.id, final_name, e
            );
            if let Err(save_err) = journal.record_failure(&record.merge_id, &e).await {
                warn!("Could not record failure of merge {}: {}", record.merge_id, save_err);
            }
            return Err(GmailError::MergeStranded {
                merge_id: record.merge_id,
                source_id: source.id,
                target_id: target.id,
                final_name,
                cause: Box::new(e),
            });
        }
        journal.advance(&record.merge_id, MergePhase::Done).await?;

        Ok(RenameOutcome::Merged {
            label_id: source.id,
            from: source.name,
            to: final_name,
            deleted_target_id: target.id,
            merge_id: Some(record.merge_id),
            applied: true,
        })
    }

    /// Replace `pattern` with `replacement` in every user label containing it
    pub async fn bulk_rename(&self, pattern: &str, replacement: &str) -> Result<PaceReport<Label, Label>> {
        if pattern.is_empty() {
            return Err(GmailError::LabelError(
                "bulk rename needs a non-empty pattern".to_string(),
            ));
        }

        let cache = self.load_cache().await?;
        let renames: Vec<Label> = cache
            .matching(pattern)
            .into_iter()
            .map(|label| label.renamed(&substitute_first(&label.name, Some(pattern), replacement)))
            .collect();
        for label in &renames {
            debug!(
                "Will rename {} from '{}' to '{}'",
                label.id,
                cache.name_of(&label.id).unwrap_or_default(),
                label.name
            );
        }

        Ok(self
            .pacer
            .run(
                PaceMode::Update,
                renames,
                |l| format!("label {} -> '{}'", l.id, l.name),
                |label| async move { self.client.update_label(&label).await },
            )
            .await)
    }

    /// Labels a bulk delete with `pattern` would remove
    pub async fn bulk_delete_candidates(&self, pattern: &str) -> Result<Vec<Label>> {
        if pattern.is_empty() {
            return Err(GmailError::LabelError(
                "bulk delete needs a non-empty pattern".to_string(),
            ));
        }
        let cache = self.load_cache().await?;
        Ok(cache.matching(pattern).into_iter().cloned().collect())
    }

    /// Delete each of `labels`, paced
    pub async fn bulk_delete(&self, labels: Vec<Label>) -> PaceReport<Label, ()> {
        self.pacer
            .run(
                PaceMode::Delete,
                labels,
                |l| format!("label {} '{}'", l.id, l.name),
                |label| async move { self.client.delete_label(&label.id).await },
            )
            .await
    }

    /// Finish every merge the journal shows as unfinished
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut journal = MergeJournal::load(&self.journal_path).await?;
        let pending = journal.unfinished();
        let mut report = RepairReport::default();

        if pending.is_empty() {
            info!("No unfinished merges in {:?}", journal.path());
            return Ok(report);
        }

        for record in pending {
            info!(
                "Resuming merge {} ({:?}): {} <- {} as '{}'",
                record.merge_id, record.phase, record.source_id, record.target_id, record.final_name
            );
            if self.pacer.is_dry_run() {
                info!("[dry run] would resume merge {}", record.merge_id);
                continue;
            }

            match self.resume(&mut journal, &record).await {
                Ok(()) => report.completed.push(record),
                Err(e) if !e.is_transport() => {
                    error!("Merge journal unusable, stopping repair: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Merge {} still unfinished: {}", record.merge_id, e);
                    journal.record_failure(&record.merge_id, &e).await?;
                    report.failed.push((record, e));
                }
            }
        }

        let pruned = journal.prune_done();
        if pruned > 0 {
            journal.save().await?;
        }
        Ok(report)
    }

    async fn resume(&self, journal: &mut MergeJournal, record: &MergeRecord) -> Result<()> {
        if !record.target_deleted() {
            let deleted = self
                .pacer
                .run_one(PaceMode::Delete, &record.target_id, || {
                    self.client.delete_label(&record.target_id)
                })
                .await;
            match deleted {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Target {} already gone", record.target_id);
                }
                Err(e) => return Err(e),
            }
            journal.advance(&record.merge_id, MergePhase::Deleted).await?;
        }

        journal
            .advance(&record.merge_id, MergePhase::PendingUpdate)
            .await?;
        let source = self.client.get_label(&record.source_id).await?;
        let renamed = source.renamed(&record.final_name);
        self.pacer
            .run_one(PaceMode::Update, &record.source_id, || {
                self.client.update_label(&renamed)
            })
            .await?;
        journal.advance(&record.merge_id, MergePhase::Done).await?;
        info!("Merge {} completed", record.merge_id);
        Ok(())
    }
}
