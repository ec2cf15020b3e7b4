use anyhow::Result;
use clap::Parser;
use gmail_rules::cli::{Cli, Commands, ProgressReporter, Session};
use gmail_rules::client::{GmailClient, ProductionGmailClient};
use gmail_rules::config::Config;
use gmail_rules::error::GmailError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: MultiProgress,
    buffer: Vec<u8>,
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter {
            multi: self.multi.clone(),
            buffer: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-rules --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // On Windows ring avoids the NASM/CMake toolchain aws-lc-rs needs
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_rules=debug,warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_rules=info,warn"))
    };

    // Logs print above progress bars
    let multi_progress = MultiProgress::new();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: multi_progress.clone(),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub =
                gmail_rules::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let client = ProductionGmailClient::new(hub, Config::default().client_options());
            println!("Connected to account: {}", client.profile_address().await?);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;
            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - pacing.create_interval_secs: seconds between filter creations (5-10)");
            println!("  - fetch.concurrency: parallel message fetches (1-50)");
            println!("  - execution.dry_run: log changes without making them");
            Ok(())
        }

        command => {
            let mut config = Config::load(&cli.config).await?;
            if cli.check {
                config.execution.dry_run = true;
            }
            if config.execution.dry_run {
                let _ = multi_progress.println("Running in CHECK mode - no changes will be made");
            }

            let reporter = ProgressReporter::with_multi_progress(multi_progress);
            let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
            let hub =
                gmail_rules::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

            let client: Arc<dyn GmailClient> =
                Arc::new(ProductionGmailClient::new(hub, config.client_options()));
            let session = Session::new(client, &config, cli.journal, reporter);

            match command {
                Commands::Filters { command } => session.run_filters(command).await?,
                Commands::Labels { command } => session.run_labels(command).await?,
                Commands::Spam { command } => session.run_spam(command).await?,
                Commands::Auth { .. } | Commands::InitConfig { .. } => {}
            }
            Ok(())
        }
    }
}
