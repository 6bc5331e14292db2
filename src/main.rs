use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use vault_sync::models::TrackedPatterns;
use vault_sync::{ConflictFile, ConflictResolver, Resolution, SyncConfig, SyncService, SyncStatus};

/// Sync a git-versioned vault with an S3 bucket
///
/// History lives in <root>/.git and is mirrored under <bucket>/<prefix>/.git.
/// Files matching `filter=lfs` patterns in .gitattributes are uploaded to
/// <prefix>/lfs/objects and committed as pointer files.
///
/// Settings come from vault_sync.json in the config directory, then
/// VAULT_SYNC_* environment variables, then the flags below.
#[derive(Parser)]
#[command(name = "vault-sync")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding vault_sync.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Local vault root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[arg(long, global = true)]
    bucket: Option<String>,

    #[arg(long, global = true)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the vault to the bucket, cloning remote history if present
    Connect {
        /// Also write the effective settings to the config directory
        #[arg(long)]
        save: bool,
    },

    /// Commit local changes and publish them
    Push,

    /// Merge remote history into the vault
    Pull,

    /// Discard every uncommitted change
    Restore {
        /// Confirm that local changes may be thrown away
        #[arg(long, short)]
        yes: bool,
    },

    /// Show whether the vault has unsynced changes
    Status,

    /// Upload tracked large files and replace them with pointers
    Clean,

    /// Download tracked large files in place of their pointers
    Smudge,
}

/// Asks on the terminal how to settle each conflicting file
struct PromptResolver;

#[async_trait]
impl ConflictResolver for PromptResolver {
    async fn resolve(&self, conflicts: &[ConflictFile]) -> Option<HashMap<String, Resolution>> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut resolutions = HashMap::new();

        let header = format!("{} file(s) conflict with the remote vault\n", conflicts.len());
        let _ = stdout.write_all(header.as_bytes()).await;

        for conflict in conflicts {
            loop {
                let prompt = format!(
                    "{}: keep [l]ocal, [r]emote, [b]oth, or [c]ancel? ",
                    conflict.path
                );
                let _ = stdout.write_all(prompt.as_bytes()).await;
                let _ = stdout.flush().await;

                let answer = lines.next_line().await.ok().flatten()?;
                if matches!(answer.trim(), "c" | "cancel") {
                    return None;
                }
                match answer.parse::<Resolution>() {
                    Ok(resolution) => {
                        resolutions.insert(conflict.path.clone(), resolution);
                        break;
                    }
                    Err(e) => {
                        let _ = stdout.write_all(format!("{}\n", e).as_bytes()).await;
                    }
                }
            }
        }

        Some(resolutions)
    }
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => SyncConfig::default_dir().context("no config directory on this platform")?,
    };
    let mut config = SyncConfig::load(&dir)
        .with_context(|| format!("reading config from {}", dir.display()))?
        .apply_env();

    if let Some(root) = &cli.root {
        config.local_root = root.clone();
    }
    if let Some(bucket) = &cli.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.prefix = prefix.clone();
    }
    if config.local_root.as_os_str().is_empty() {
        config.local_root = std::env::current_dir()?;
    }
    Ok(config)
}

fn print_status(status: SyncStatus) {
    match status {
        SyncStatus::Syncing {
            phase,
            percent: Some(percent),
        } => eprintln!("[{:>3}%] {}", percent, phase),
        SyncStatus::Syncing { phase, .. } => eprintln!("{}...", phase),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    vault_sync::init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Commands::Connect { save: true } = cli.command {
        let dir = match &cli.config_dir {
            Some(dir) => dir.clone(),
            None => SyncConfig::default_dir().context("no config directory on this platform")?,
        };
        config.save(&dir)?;
    }

    let service = SyncService::from_config(config)
        .await?
        .with_reporter(Arc::new(print_status));

    match cli.command {
        Commands::Connect { .. } => {
            let outcome = service.connect().await?;
            println!("{:?}", outcome);
        }
        Commands::Push => {
            let outcome = service.push_with(&PromptResolver).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Pull => {
            let outcome = service.pull().await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Restore { yes } => {
            let outcome = service.restore(yes).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Status => {
            let status = service.refresh_status().await?;
            println!("{}", serde_json::to_string(&status)?);
        }
        Commands::Clean => {
            let patterns = TrackedPatterns::load(&service.local_root()).await;
            let cleaned = service.lfs().clean_files(&patterns, None).await?;
            for path in cleaned {
                println!("{}", path);
            }
        }
        Commands::Smudge => {
            let patterns = TrackedPatterns::load(&service.local_root()).await;
            let restored = service.lfs().smudge_files(&patterns, None).await?;
            for path in restored {
                println!("{}", path);
            }
        }
    }

    Ok(())
}
