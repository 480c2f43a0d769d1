//! Evidence CLI subcommands for inspecting and re-uploading offline evidence.
//!
//! Provides commands to:
//! - `list`: Show dead-lettered recordings with their sidecar metadata
//! - `retry`: Run one upload pass over them now

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Subcommand;

use crate::adapters::{HttpObjectStore, ObjectStore};
use crate::config::Settings;
use crate::uploader::{retry_pass, DeadLetterStore};

/// Evidence-related subcommands
#[derive(Subcommand, Debug)]
pub enum EvidenceCommands {
    /// List offline evidence waiting for upload
    List,

    /// Upload offline evidence once, deleting what succeeds
    Retry,
}

pub async fn execute(command: EvidenceCommands, mut settings: Settings) -> Result<()> {
    let store = DeadLetterStore::new(settings.output_dir());

    match command {
        EvidenceCommands::List => list_evidence(&store),
        EvidenceCommands::Retry => {
            settings.apply_credentials();
            retry_evidence(&settings, &store).await
        }
    }
}

fn list_evidence(store: &DeadLetterStore) -> Result<()> {
    let pending = store.list()?;
    if pending.is_empty() {
        println!("No offline evidence in {}", store.dir().display());
        return Ok(());
    }

    println!("{} offline recording(s) in {}", pending.len(), store.dir().display());
    println!();

    for evidence in pending {
        let name = evidence
            .wav_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let modified = evidence
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        match evidence.sidecar() {
            Some(sidecar) => println!(
                "  {}  {:<20} {:>4.0}%  {:>5.1}s  {}",
                modified,
                sidecar.metadata.label,
                sidecar.metadata.confidence * 100.0,
                sidecar.duration_seconds,
                name
            ),
            None => println!("  {}  {:<20} (no metadata)  {}", modified, "?", name),
        }
    }

    Ok(())
}

async fn retry_evidence(settings: &Settings, dead_letter: &DeadLetterStore) -> Result<()> {
    if !settings.uploads_online() {
        anyhow::bail!("Cloud upload is disabled or missing credentials");
    }

    let cloud = &settings.services.cloud;
    let endpoint = cloud.endpoint.as_deref().context("services.cloud.endpoint is not set")?;
    let store = HttpObjectStore::new(
        endpoint,
        &cloud.bucket,
        cloud.access_key.clone(),
        cloud.secret_key.clone(),
    )?;

    println!("Uploading offline evidence to {}...", store.name());
    let report = retry_pass(&store, dead_letter, None).await?;

    println!(
        "✓ {} uploaded, {} failed ({} attempted)",
        report.uploaded, report.failed, report.attempted
    );
    if report.failed > 0 {
        println!("  Failed files were kept for the next pass");
    }

    Ok(())
}
