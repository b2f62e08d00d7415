//! QC-Archive-Admin: operator tool for one channel's block archive.
//!
//! Opens the channel's segment store and archive index directly. `status`
//! and `verify` open them read-only and are safe next to a live node;
//! `archive` and `set-archived` repair and write, so they must not run
//! against a channel a live node is writing. Every command prints a JSON
//! document on stdout; logs go to stderr.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qc_02_block_archive::{
    ArchiveControl, ArchiveTrigger, ArchivingChannel, BusNotificationBridge, ChainView,
    Ed25519PolicyVerifier, FileArchiveIndex, ObjectStoreTransfer, RemoteRepository,
    TriggerReport,
};
use shared_bus::InMemoryEventBus;

use crate::config::AdminConfig;

/// QC-Archive-Admin: inspect and drive the block archive
#[derive(Parser, Debug)]
#[command(name = "qc-archive-admin")]
#[command(about = "Status, manual archiving and chain verification for one channel")]
struct Args {
    /// TOML config file; the QC_* environment is used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel to operate on
    #[arg(long)]
    channel: Option<String>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chain height, local segments, watermark and remote manifest
    Status,
    /// Run the configured role's policy once
    Archive,
    /// Record a segment as archived by hand
    SetArchived {
        segment: u64,
        /// Also remove the local file (refused for the latest config block)
        #[arg(long)]
        delete_local: bool,
    },
    /// Walk the whole chain, reading archived blocks from the repository
    Verify,
}

struct Opened {
    channel_id: String,
    channel: ArchivingChannel,
    repository: RemoteRepository,
}

impl Command {
    /// Commands that only read the channel.
    fn is_read_only(&self) -> bool {
        matches!(self, Command::Status | Command::Verify)
    }
}

fn open(config: &AdminConfig, channel_flag: Option<&str>, read_only: bool) -> Result<Opened> {
    let channel_id = config.channel(channel_flag);
    let archiving = config.archiving_config();
    let storage = config.store_config();

    let repository = RemoteRepository::from_url(&archiving.repository_url)
        .with_context(|| format!("opening repository {}", archiving.repository_url))?;
    let index = FileArchiveIndex::in_channel_dir(storage.channel_dir(&channel_id))
        .context("opening archive index")?;
    let transfer = ObjectStoreTransfer::new(&storage.root_dir, repository.clone());
    // Broadcasts from a one-shot tool reach no one; the manifest carries the state.
    let bridge = BusNotificationBridge::new(
        Arc::new(InMemoryEventBus::new()),
        archiving.org_id.clone(),
        repository.clone(),
    );

    info!(
        channel = %channel_id,
        role = ?archiving.role,
        root = %storage.root_dir.display(),
        repository = %repository.url(),
        read_only,
        "[qc-archive-admin] Opening channel"
    );
    let index = Arc::new(index);
    let transfer = Arc::new(transfer);
    let bridge = Arc::new(bridge);
    let channel = if read_only {
        ArchivingChannel::open_read_only(
            storage,
            archiving,
            channel_id.clone(),
            index,
            transfer,
            bridge,
        )
    } else {
        ArchivingChannel::open(storage, archiving, channel_id.clone(), index, transfer, bridge)
    }
    .with_context(|| format!("opening channel {channel_id}"))?;

    Ok(Opened {
        channel_id,
        channel,
        repository,
    })
}

async fn status(opened: &Opened) -> Result<serde_json::Value> {
    let store = opened.channel.store();
    let manifest = opened
        .repository
        .load_manifest(&opened.channel_id)
        .await
        .context("reading remote manifest")?;

    Ok(json!({
        "channel": opened.channel_id,
        "role": format!("{:?}", opened.channel.coordinator().role()),
        "height": store.chain_height(),
        "open_segment": store.open_segment(),
        "local_segments": store.local_segments()?,
        "latest_config_block": store.latest_config_block(),
        "watermark": opened.channel.coordinator().watermark().get(),
        "remote_archived_height": manifest.as_ref().and_then(|m| m.archived_block_height()),
        "remote_segments": manifest.map(|m| m.segments.len()).unwrap_or(0),
    }))
}

async fn archive(opened: &Opened) -> Result<serde_json::Value> {
    let report = opened
        .channel
        .coordinator()
        .on_trigger(ArchiveTrigger::Administrative)
        .await
        .context("archive pass failed")?;

    Ok(match report {
        TriggerReport::Disabled => json!({ "outcome": "disabled" }),
        TriggerReport::Ignored => json!({ "outcome": "ignored" }),
        TriggerReport::Archived(r) => json!({
            "outcome": "archived",
            "segments": r.archived,
            "already_archived": r.already_archived,
            "bytes_transferred": r.bytes_transferred,
            "deleted_locally": r.deleted_locally,
            "watermark": r.watermark,
        }),
        TriggerReport::Discarded(r) => json!({
            "outcome": "discarded",
            "reported_height": r.reported_height,
            "segments": r.discarded,
            "protected": r.protected,
            "watermark": r.watermark,
        }),
    })
}

async fn set_archived(
    opened: &Opened,
    segment: u64,
    delete_local: bool,
) -> Result<serde_json::Value> {
    let outcome = opened
        .channel
        .coordinator()
        .set_archived(segment, delete_local)
        .await
        .with_context(|| format!("marking segment {segment} archived"))?;

    Ok(json!({
        "segment": segment,
        "watermark_advanced": outcome.watermark_advanced,
        "deleted": outcome.deleted,
        "protected": outcome.protected,
        "watermark": opened.channel.coordinator().watermark().get(),
    }))
}

async fn verify(opened: &Opened, config: &AdminConfig) -> Result<(serde_json::Value, bool)> {
    let verifier = Ed25519PolicyVerifier::new(config.trusted_keys()?, config.policy.threshold);
    let report = opened
        .channel
        .checker(Arc::new(verifier))
        .verify()
        .await
        .context("reading chain for verification")?;
    let pass = report.pass;
    Ok((serde_json::to_value(report)?, pass))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = AdminConfig::load(args.config.as_deref())?;
    let opened = open(&config, args.channel.as_deref(), args.command.is_read_only())?;

    let mut pass = true;
    let output = match args.command {
        Command::Status => status(&opened).await?,
        Command::Archive => archive(&opened).await?,
        Command::SetArchived {
            segment,
            delete_local,
        } => set_archived(&opened, segment, delete_local).await?,
        Command::Verify => {
            let (output, verified) = verify(&opened, &config).await?;
            pass = verified;
            output
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    if !pass {
        std::process::exit(2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_commands_open_read_only() {
        let parse = |argv: &[&str]| Args::try_parse_from(argv).unwrap().command;
        assert!(parse(&["qc-archive-admin", "status"]).is_read_only());
        assert!(parse(&["qc-archive-admin", "verify"]).is_read_only());
        assert!(!parse(&["qc-archive-admin", "archive"]).is_read_only());
        assert!(!parse(&["qc-archive-admin", "set-archived", "3", "--delete-local"]).is_read_only());
    }
}
