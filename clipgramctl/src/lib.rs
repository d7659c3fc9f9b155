use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use clipgram_core::records::{StoredFile, UsageRecord};
use clipgram_core::store::{RecordStore, SqliteRecordStore, StoreError};
use clipgram_core::{load_config, ConfigError};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "clipgram operator command-line interface", long_about = None)]
pub struct Cli {
    /// Path of the main clipgram.toml
    #[arg(long, default_value = "configs/clipgram.toml")]
    pub config: PathBuf,
    /// Alternate path for records.sqlite
    #[arg(long)]
    pub records_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stored-file operations
    #[command(subcommand)]
    Files(FilesCommands),
    /// Per-user usage counters
    #[command(subcommand)]
    Usage(UsageCommands),
    /// Export a compressed backup of the records database
    Backup(BackupArgs),
}

#[derive(Subcommand, Debug)]
pub enum FilesCommands {
    /// List stored-file records
    List(FilesListArgs),
    /// Delete all stored-file records, preserving usage statistics
    Purge,
}

#[derive(Args, Debug)]
pub struct FilesListArgs {
    /// Limit on returned records
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum UsageCommands {
    /// Show counters for one user
    Show(UsageShowArgs),
}

#[derive(Args, Debug)]
pub struct UsageShowArgs {
    pub user: String,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Output path for the gzip SQL dump
    pub output: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let records_db = cli
        .records_db
        .unwrap_or_else(|| Path::new(&config.paths.data_dir).join("records.sqlite"));
    let store = SqliteRecordStore::builder().path(&records_db).build()?;
    store.initialize()?;

    match cli.command {
        Commands::Files(FilesCommands::List(args)) => {
            let mut files = store.list_files().await?;
            files.truncate(args.limit);
            match cli.format {
                OutputFormat::Text => print!("{}", render_files(&files)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
            }
        }
        Commands::Files(FilesCommands::Purge) => {
            let removed = store.purge_files().await?;
            match cli.format {
                OutputFormat::Text => println!("purged {removed} file records"),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "purged": removed }))
                }
            }
        }
        Commands::Usage(UsageCommands::Show(args)) => {
            let usage = store.get_usage(&args.user).await?;
            match cli.format {
                OutputFormat::Text => match usage {
                    Some(usage) => print!("{}", render_usage(&usage)),
                    None => println!("no usage recorded for {}", args.user),
                },
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&usage)?),
            }
        }
        Commands::Backup(args) => {
            store.export_backup(&args.output)?;
            println!("backup written to {}", args.output.display());
        }
    }
    Ok(())
}

fn render_files(files: &[StoredFile]) -> String {
    let mut out = String::new();
    if files.is_empty() {
        out.push_str("no stored files\n");
        return out;
    }
    for file in files {
        out.push_str(&format!(
            "{}  {:>8.1}MB  {}  expires {}\n",
            file.key,
            file.size_mb,
            file.owner,
            file.expires_at.format("%Y-%m-%d"),
        ));
    }
    out
}

fn render_usage(usage: &UsageRecord) -> String {
    format!(
        "user: {}\nrequests: {}\ntotal: {:.1}MB\n  tube_audio: {:.1}MB\n  tube_video: {:.1}MB\n  clip_video: {:.1}MB\n",
        usage.user_id,
        usage.request_count,
        usage.total_mb,
        usage.tube_audio_mb,
        usage.tube_video_mb,
        usage.clip_video_mb,
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use clipgram_core::records::SourceCategory;

    use super::*;

    #[test]
    fn renders_usage_breakdown() {
        let usage = UsageRecord {
            user_id: "user-1".to_string(),
            request_count: 3,
            total_mb: 5.5,
            tube_audio_mb: 4.2,
            tube_video_mb: 0.0,
            clip_video_mb: 1.3,
        };
        let rendered = render_usage(&usage);
        assert!(rendered.contains("requests: 3"));
        assert!(rendered.contains("total: 5.5MB"));
        assert!(rendered.contains("tube_audio: 4.2MB"));
        assert!(rendered.contains("clip_video: 1.3MB"));
    }

    #[test]
    fn renders_file_rows() {
        let now = Utc::now();
        let files = vec![StoredFile {
            key: "downloads/tube_audio/a.m4a".to_string(),
            category: SourceCategory::TubeAudio,
            title: "A".to_string(),
            origin_url: "https://tube.example/a".to_string(),
            owner: "user-1".to_string(),
            size_mb: 4.2,
            created_at: now,
            expires_at: now + Duration::days(14),
        }];
        let rendered = render_files(&files);
        assert!(rendered.contains("downloads/tube_audio/a.m4a"));
        assert!(rendered.contains("4.2MB"));
        assert!(render_files(&[]).contains("no stored files"));
    }
}
