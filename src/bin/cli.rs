// RipStream Core - Music Streaming Download Engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ripstream_core::download::{
    DownloadId, DownloadProgress, DownloadState, DownloaderConfig, ProgressCallback,
    ProgressTracker, SessionManager,
};
use ripstream_core::provider::ProviderFactory;
use ripstream_core::storage::{Database, DownloadHistory, RecordStatus};
use ripstream_core::url_parser::{parse_url, UrlValidator};
use ripstream_core::DownloadService;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ripstream-cli")]
#[command(about = "RipStream CLI - Desktop testing tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a streaming URL and print the result as JSON
    Parse { url: String },
    /// Check whether a URL is supported
    Validate { url: String },
    /// Summarize what a URL resolves to and which services are supported
    Info { url: String },
    /// List recorded downloads
    History {
        /// History database (defaults to the platform data directory)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Only show records in this status (pending, downloading, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
        /// Delete completed records and reclaim their space first
        #[arg(long)]
        compact: bool,
    },
    /// Download the content behind a URL
    Download {
        url: String,
        /// Target directory (overrides the configured download directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// JSON downloader configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { url } => {
            let parsed = parse_url(&url);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Commands::Validate { url } => {
            let (valid, message) = UrlValidator::new().validate(&url);
            println!("{}", message);
            if !valid {
                std::process::exit(1);
            }
        }
        Commands::Info { url } => {
            let validator = UrlValidator::new();
            println!("{}", serde_json::to_string_pretty(&validator.url_info(&url))?);

            let factory = ProviderFactory::with_defaults();
            let services: Vec<&str> = factory
                .supported_services()
                .iter()
                .map(|s| s.display_name())
                .collect();
            println!("Downloads available for: {}", services.join(", "));
        }
        Commands::History { db, status, compact } => {
            let status = status
                .map(|s| s.parse::<RecordStatus>())
                .transpose()
                .context("Invalid --status")?;
            let path = db.unwrap_or_else(Database::get_default_path);
            let database = Database::new(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let history = DownloadHistory::new(database);

            if compact {
                let removed = history.compact().await?;
                println!("Removed {} completed records", removed);
            }

            let records = history.list_downloads(status).await?;
            if records.is_empty() {
                println!("No downloads recorded");
            }
            for record in &records {
                println!(
                    "{}  {:<11} {:>5.1}%  {} {} - {}",
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.status,
                    record.progress_percentage,
                    record.source,
                    record.media_type,
                    record.title
                );
                if let Some(error) = &record.error_message {
                    println!("    {}", error);
                }
            }

            let stats = history.statistics().await?;
            println!(
                "{} total, {} completed, {} failed, {} pending",
                stats.total, stats.completed, stats.failed, stats.pending
            );
        }
        Commands::Download { url, dir, config } => {
            let config = match config {
                Some(path) => DownloaderConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => DownloaderConfig::default(),
            };

            let tracker = Arc::new(ProgressTracker::new());
            let service = DownloadService::new(
                ProviderFactory::with_defaults(),
                Arc::new(SessionManager::new(config)),
                Arc::clone(&tracker),
            );

            let result = service
                .download_from_url(&url, dir.as_deref(), None, Some(progress_logger()))
                .await;
            service.cleanup().await;

            for item in result.results() {
                match (&item.file_path, item.success) {
                    (Some(path), true) => log::info!(
                        "Saved {} ({}, {})",
                        path.display(),
                        item.formatted_file_size(),
                        item.formatted_speed()
                    ),
                    _ => log::warn!(
                        "Item {} failed: {}",
                        item.download_id,
                        item.error_message.as_deref().unwrap_or("Unknown error")
                    ),
                }
            }

            if !result.is_success() {
                bail!(
                    "Download failed: {}",
                    result
                        .error_message()
                        .unwrap_or_else(|| "Unknown error".to_string())
                );
            }
        }
    }

    Ok(())
}

/// Logs every tenth percent plus state changes
fn progress_logger() -> ProgressCallback {
    let last_step = parking_lot::Mutex::new(None::<(DownloadState, u8)>);

    Arc::new(move |id: DownloadId, progress: &DownloadProgress| {
        let step = (progress.percentage / 10.0) as u8;
        let mut last = last_step.lock();
        if *last != Some((progress.state, step)) {
            *last = Some((progress.state, step));
            log::info!("[{}] {}", id, progress.status_line());
        }
        Ok(())
    })
}
