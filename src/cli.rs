//! Command-line interface

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::client::GmailClient;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::fetcher::BoundedFetcher;
use crate::filter_manager::{FilterQuery, FilterReconciler, ReconcileReport};
use crate::label_manager::{LabelMerger, RenameOutcome, RenameRequest};
use crate::models::{Filter, FilterAction, FilterCriteria, Label};
use crate::pacer::{PaceReport, Pacer};
use crate::paging::PagedLister;
use crate::relabel::BulkRelabeler;
use crate::triage::{HeaderExport, SpamTriager, TriageMode, TriageReport};

#[derive(Parser, Debug)]
#[command(name = "gmail-rules")]
#[command(version)]
#[command(about = "Reconcile Gmail filters and labels with a rule file", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json", global = true)]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-rules/token.json", global = true)]
    pub token_cache: PathBuf,

    /// Path to the merge journal (overrides the config file)
    #[arg(long, global = true)]
    pub journal: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Check only: log every change without making it
    #[arg(short = 'c', long = "check", global = true)]
    pub check: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Write an example configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Inspect and reconcile server-side filters
    Filters {
        #[command(subcommand)]
        command: FilterCommand,
    },

    /// Rename, merge and delete labels
    Labels {
        #[command(subcommand)]
        command: LabelCommand,
    },

    /// Triage messages in spam (or under other labels)
    Spam {
        #[command(subcommand)]
        command: SpamCommand,
    },
}

/// Filter criteria shared by `show`, `remove` and `add`
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Recipient criterion
    #[arg(short, long)]
    pub to: Option<String>,

    /// Sender criterion
    #[arg(short, long)]
    pub from: Option<String>,

    /// Subject criterion
    #[arg(short, long)]
    pub subject: Option<String>,

    /// Search query criterion
    #[arg(short, long)]
    pub query: Option<String>,

    /// Label ids the filter adds (comma-separated)
    #[arg(short = 'a', long = "add", value_delimiter = ',')]
    pub add_label_ids: Vec<String>,
}

impl FilterArgs {
    pub fn to_query(&self) -> FilterQuery {
        FilterQuery {
            to: self.to.clone(),
            from: self.from.clone(),
            subject: self.subject.clone(),
            query: self.query.clone(),
            add_label_ids: self.add_label_ids.clone(),
        }
    }

    pub fn to_filter(&self, remove_label_ids: &[String]) -> Filter {
        Filter {
            id: None,
            criteria: FilterCriteria {
                to: self.to.clone(),
                from: self.from.clone(),
                subject: self.subject.clone(),
                query: self.query.clone(),
            },
            action: FilterAction {
                add_label_ids: self.add_label_ids.clone(),
                remove_label_ids: remove_label_ids.to_vec(),
            },
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum FilterCommand {
    /// Print live filters matching the criteria (all when none given)
    Show(FilterArgs),

    /// Delete live filters matching the criteria
    Remove(FilterArgs),

    /// Create one filter
    Add {
        #[command(flatten)]
        filter: FilterArgs,

        /// Label ids the filter removes (comma-separated)
        #[arg(short = 'r', long = "remove", value_delimiter = ',')]
        remove_label_ids: Vec<String>,
    },

    /// Create a filter for every rule-file row not yet covered
    Process {
        /// Tab-separated rule file
        #[arg(short = 'l', long = "file")]
        file: PathBuf,
    },

    /// Print the from addresses live filters already cover
    Froms,

    /// Apply existing filters to matching inbox mail
    Apply {
        /// Filter ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum LabelCommand {
    /// Print user labels, or the given label ids
    Show {
        ids: Vec<String>,
    },

    /// Rename a label, or merge it into another
    Rename {
        /// Id of the label to change
        #[arg(short, long)]
        source: String,

        /// Id of a label to merge into; the result takes its name
        #[arg(short, long)]
        target: Option<String>,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// Substring to replace in the resulting name
        #[arg(short, long)]
        pattern: Option<String>,

        /// Replacement for the first occurrence of the pattern
        #[arg(short, long, default_value = "")]
        replacement: String,
    },

    /// Replace a substring in every user label containing it
    BulkRename {
        #[arg(short, long)]
        pattern: String,

        #[arg(short, long, default_value = "")]
        replacement: String,
    },

    /// Delete every user label whose name contains the pattern
    BulkDelete {
        #[arg(short, long)]
        pattern: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Resume merges left unfinished by an earlier run
    Repair,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LabelArgs {
    /// Label ids to list messages under (comma-separated, default SPAM)
    #[arg(short = 'l', long = "labels", value_delimiter = ',')]
    pub labels: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum SpamCommand {
    /// Remove SPAM from messages that also carry a user label
    NotSpam(LabelArgs),

    /// Remove SPAM from every listed message
    Unspamify(LabelArgs),

    /// Print subject and label names of every listed message
    ShowTitles(LabelArgs),

    /// Write every listed message's headers as JSON rows
    Export {
        #[command(flatten)]
        labels: LabelArgs,

        /// Output file
        #[arg(short, long, default_value = "spam-headers.json")]
        output: PathBuf,
    },
}

/// Progress bars sharing one MultiProgress with the log writer
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    counter_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let counter_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {pos:>7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
            counter_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Spinner that counts items as they complete
    pub fn add_counter(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.counter_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    /// Ask before a destructive step; progress bars are hidden while asking
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        self.multi.suspend(|| {
            inquire::Confirm::new(prompt)
                .with_default(false)
                .prompt()
                .map_err(|e| GmailError::ConfigError(format!("Confirmation failed: {}", e)))
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a command needs to talk to one account
pub struct Session {
    client: Arc<dyn GmailClient>,
    lister: PagedLister,
    pacer: Pacer,
    fetch_concurrency: usize,
    journal_path: PathBuf,
    reporter: ProgressReporter,
}

impl Session {
    pub fn new(
        client: Arc<dyn GmailClient>,
        config: &Config,
        journal: Option<PathBuf>,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            client,
            lister: PagedLister::new(config.execution.max_pages),
            pacer: Pacer::from_config(config),
            fetch_concurrency: config.fetch.concurrency,
            journal_path: journal.unwrap_or_else(|| config.paths.merge_journal.clone()),
            reporter,
        }
    }

    fn filters(&self) -> FilterReconciler {
        FilterReconciler::new(Arc::clone(&self.client), self.lister, self.pacer.clone())
    }

    fn labels(&self) -> LabelMerger {
        LabelMerger::new(
            Arc::clone(&self.client),
            self.lister,
            self.pacer.clone(),
            self.journal_path.clone(),
        )
    }

    pub async fn run_filters(&self, command: FilterCommand) -> Result<()> {
        let reconciler = self.filters();
        match command {
            FilterCommand::Show(args) => {
                let filters = reconciler.matching(&args.to_query()).await?;
                println!("{}", serde_json::to_string_pretty(&filters)?);
                info!("{} filters", filters.len());
            }
            FilterCommand::Remove(args) => {
                let query = args.to_query();
                if query.is_empty() {
                    return Err(GmailError::FilterError(
                        "refusing to remove every filter; give at least one criterion".to_string(),
                    ));
                }
                let report = reconciler.remove_matching(&query).await?;
                print_pace_summary("Filters removed", &report);
            }
            FilterCommand::Add {
                filter,
                remove_label_ids,
            } => match reconciler.add(filter.to_filter(&remove_label_ids)).await? {
                Some(created) => println!("{}", serde_json::to_string_pretty(&created)?),
                None => println!("Dry run: filter not created"),
            },
            FilterCommand::Process { file } => {
                let rows = crate::rules::read_rule_file(&file).await?;
                let spinner = self.reporter.add_spinner("Reconciling filters...");
                let report = reconciler.reconcile(&rows).await;
                spinner.finish_and_clear();
                print_reconcile_report(&report?);
            }
            FilterCommand::Froms => {
                for from in reconciler.list_live_froms().await? {
                    println!("{}", from);
                }
            }
            FilterCommand::Apply { ids } => {
                let relabeler =
                    BulkRelabeler::new(Arc::clone(&self.client), self.lister, self.pacer.clone());
                for id in ids {
                    let report = relabeler.apply(&id).await?;
                    println!(
                        "{}: {} messages matched {:?} (+{:?} -{:?}){}",
                        report.filter_id,
                        report.matched,
                        report.query,
                        report.add_label_ids,
                        report.remove_label_ids,
                        if report.applied { "" } else { ", not modified" }
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn run_labels(&self, command: LabelCommand) -> Result<()> {
        let merger = self.labels();
        match command {
            LabelCommand::Show { ids } => {
                let labels = merger.show(&ids).await?;
                for label in &labels {
                    println!("{}: {}", label.id, label.name);
                }
                println!("{}", serde_json::to_string_pretty(&labels)?);
            }
            LabelCommand::Rename {
                source,
                target,
                name,
                pattern,
                replacement,
            } => {
                let request = RenameRequest {
                    source,
                    target,
                    name,
                    pattern,
                    replacement,
                };
                print_rename_outcome(&merger.rename(&request).await?);
            }
            LabelCommand::BulkRename {
                pattern,
                replacement,
            } => {
                let report = merger.bulk_rename(&pattern, &replacement).await?;
                for (label, renamed) in report.completed_values() {
                    println!("{} -> {}", label.name, renamed.name);
                }
                print_pace_summary("Labels renamed", &report);
            }
            LabelCommand::BulkDelete { pattern, force } => {
                let candidates = merger.bulk_delete_candidates(&pattern).await?;
                if candidates.is_empty() {
                    println!("No user labels contain {:?}", pattern);
                    return Ok(());
                }
                print_labels("Labels to delete", &candidates);
                if !force
                    && !self.pacer.is_dry_run()
                    && !self.reporter.confirm(&format!(
                        "Permanently delete {} labels?",
                        candidates.len()
                    ))?
                {
                    println!("Aborted.");
                    return Ok(());
                }
                let report = merger.bulk_delete(candidates).await;
                print_pace_summary("Labels deleted", &report);
            }
            LabelCommand::Repair => {
                let report = merger.repair().await?;
                for record in &report.completed {
                    println!(
                        "Completed merge {}: {} is now named {:?}",
                        record.merge_id, record.source_id, record.final_name
                    );
                }
                for (record, err) in &report.failed {
                    println!("Merge {} still stranded: {}", record.merge_id, err);
                }
                if report.completed.is_empty() && report.failed.is_empty() {
                    println!("No unfinished merges");
                }
            }
        }
        Ok(())
    }

    pub async fn run_spam(&self, command: SpamCommand) -> Result<()> {
        let (mode, labels, output) = match command {
            SpamCommand::NotSpam(args) => (TriageMode::NotSpam, args.labels, None),
            SpamCommand::Unspamify(args) => (TriageMode::Unspamify, args.labels, None),
            SpamCommand::ShowTitles(args) => (TriageMode::ShowTitles, args.labels, None),
            SpamCommand::Export { labels, output } => {
                (TriageMode::Export, labels.labels, Some(output))
            }
        };

        let counter = self.reporter.add_counter("messages fetched");
        let tick = counter.clone();
        let fetcher = BoundedFetcher::new(self.fetch_concurrency)?
            .with_progress(Arc::new(move || tick.inc(1)));
        let triager = SpamTriager::new(
            Arc::clone(&self.client),
            self.lister,
            fetcher,
            self.pacer.clone(),
        );
        let report = triager.run(mode, &labels).await;
        self.reporter
            .finish_spinner(&counter, &format!("{} messages fetched", counter.position()));
        let report = report?;

        if let Some(output) = output {
            HeaderExport::from_messages(&report.messages)
                .write(&output)
                .await?;
            println!(
                "Exported headers of {} messages to {:?}",
                report.messages.len(),
                output
            );
        }
        print_triage_report(&report)
    }
}

fn print_pace_summary<I, T>(title: &str, report: &PaceReport<I, T>)
where
    I: std::fmt::Debug,
{
    println!(
        "{}: {} done, {} skipped (dry run), {} failed",
        title,
        report.completed(),
        report.skipped(),
        report.failed()
    );
    for (item, err) in report.failures() {
        warn!("{:?}: {}", item, err);
    }
}

fn print_labels(title: &str, labels: &[Label]) {
    println!("{} ({}):", title, labels.len());
    for label in labels {
        println!("  - {} (ID: {})", label.name, label.id);
    }
}

fn print_reconcile_report(report: &ReconcileReport) {
    println!("\n========================================");
    println!("Filter Reconciliation Summary");
    println!("========================================");
    println!("Rule rows: {}", report.rule_rows);
    if report.duplicate_rows > 0 {
        println!("Duplicate rows ignored: {}", report.duplicate_rows);
    }
    println!("Live filters: {}", report.live_filters);
    println!("Rows without a filter: {}", report.unprocessed);
    println!("Rows without a label: {}", report.placeholders.len());
    println!("Filters created: {}", report.created());
    println!("Filters skipped (dry run): {}", report.creations.skipped());
    println!("Filters failed: {}", report.failed());
    for (row, err) in &report.unresolved {
        println!("  ! {} -> {:?}: {}", row.from, row.name, err);
    }
    for (planned, err) in report.creations.failures() {
        println!("  ! {} -> {:?}: {}", planned.row.from, planned.row.name, err);
    }
    println!("========================================");
}

fn print_rename_outcome(outcome: &RenameOutcome) {
    let dry = |applied: bool| if applied { "" } else { " (dry run)" };
    match outcome {
        RenameOutcome::NoChange => println!("Nothing to change"),
        RenameOutcome::Renamed {
            label_id,
            from,
            to,
            applied,
        } => println!("Renamed {} {:?} -> {:?}{}", label_id, from, to, dry(*applied)),
        RenameOutcome::Merged {
            label_id,
            from,
            to,
            deleted_target_id,
            applied,
            ..
        } => println!(
            "Merged {} {:?} into {:?}, deleted {}{}",
            label_id,
            from,
            to,
            deleted_target_id,
            dry(*applied)
        ),
    }
}

fn print_triage_report(report: &TriageReport) -> Result<()> {
    println!(
        "Listed {} messages, fetched {}, {} failed",
        report.listed,
        report.messages.len(),
        report.failed_ids.len()
    );
    match report.mode {
        TriageMode::NotSpam => {
            if let Some(rescued) = &report.not_spam {
                print_pace_summary("Rescued from spam", rescued);
            }
        }
        TriageMode::Unspamify => println!(
            "Unspamify batches: {} sent, {} failed",
            report.unspam_batches, report.unspam_batch_failures
        ),
        TriageMode::ShowTitles => {
            for title in &report.titles {
                println!("{}", serde_json::to_string(title)?);
            }
        }
        TriageMode::Export => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_filter_add() {
        let cli = Cli::parse_from([
            "gmail-rules",
            "filters",
            "add",
            "-f",
            "news@example.com",
            "-a",
            "Label_1,Label_2",
            "-r",
            "INBOX",
        ]);
        match cli.command {
            Commands::Filters {
                command:
                    FilterCommand::Add {
                        filter,
                        remove_label_ids,
                    },
            } => {
                let built = filter.to_filter(&remove_label_ids);
                assert_eq!(built.from_address(), Some("news@example.com"));
                assert_eq!(built.action.add_label_ids, vec!["Label_1", "Label_2"]);
                assert_eq!(built.action.remove_label_ids, vec!["INBOX"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_check_flag_after_subcommand() {
        let cli = Cli::parse_from(["gmail-rules", "labels", "repair", "--check", "-v"]);
        assert!(cli.check);
        assert!(cli.verbose);
    }

    #[test]
    fn test_rename_replacement_defaults_to_empty() {
        let cli = Cli::parse_from(["gmail-rules", "labels", "rename", "-s", "Label_1", "-p", "W"]);
        match cli.command {
            Commands::Labels {
                command:
                    LabelCommand::Rename {
                        source,
                        pattern,
                        replacement,
                        ..
                    },
            } => {
                assert_eq!(source, "Label_1");
                assert_eq!(pattern.as_deref(), Some("W"));
                assert_eq!(replacement, "");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_spam_labels_are_comma_separated() {
        let cli = Cli::parse_from(["gmail-rules", "spam", "show-titles", "-l", "SPAM,Label_9"]);
        match cli.command {
            Commands::Spam {
                command: SpamCommand::ShowTitles(args),
            } => assert_eq!(args.labels, vec!["SPAM", "Label_9"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_filter_args_query() {
        let args = FilterArgs {
            subject: Some("Invoice".to_string()),
            ..Default::default()
        };
        let query = args.to_query();
        assert_eq!(query.subject.as_deref(), Some("Invoice"));
        assert!(!query.is_empty());
        assert!(FilterArgs::default().to_query().is_empty());
    }
}
