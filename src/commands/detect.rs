//! `profile detect`: trace a reference MPI execution and persist its
//! dependencies as a profile.
//!
//! With a launcher in the command, every rank re-invokes `profile detect`
//! on the bare program and prints its observations as one JSON line; the
//! parent merges the union of all ranks into the target profile. Without a
//! launcher the command itself is traced, single-rank.

use super::Context;
use crate::constants::ENV_DETECT_LAUNCHER;
use crate::error::{Error, Result};
use crate::launchers;
use crate::libraries::{classify, Classification};
use crate::profile::Profile;
use crate::storage::StorageLevel;
use crate::trace;
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct DetectArgs {
    /// Target profile; the selected profile is updated when absent.
    pub profile: Option<String>,
    /// The reference command, launcher included.
    pub command: Vec<String>,
}

/// Observations one rank sends back to the parent.
#[derive(Serialize, Deserialize)]
struct RankReport {
    libraries: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
}

pub async fn detect(ctx: &Context, args: DetectArgs) -> Result<()> {
    if args.command.is_empty() {
        return Err(Error::NoCommand);
    }

    let split = launchers::interpret(&args.command);

    if !split.launcher.is_empty() {
        let (libraries, files) = detect_under_launcher(ctx, &split).await?;
        if ctx.dry_run {
            return Ok(());
        }
        return save(ctx, args.profile.as_deref(), libraries, files);
    }

    // No launcher: trace the bare command in this process.
    let (libraries, files) = detect_in_process(&args.command).await?;

    if util::getenv(ENV_DETECT_LAUNCHER).is_some() {
        // Rank mode: report to the parent on stdout and stop there.
        let report = RankReport { libraries, files };
        println!(
            "{}",
            serde_json::to_string(&report).map_err(|e| Error::Serialization(e.to_string()))?
        );
        return Ok(());
    }

    save(ctx, args.profile.as_deref(), libraries, files)
}

/// Re-invokes `profile detect` as the launcher's payload and merges the
/// rank reports.
async fn detect_under_launcher(
    ctx: &Context,
    split: &launchers::Split,
) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    warn_single_host(&split.launcher).await;

    let myself = std::env::current_exe()?;
    let mut command = split.launcher.clone();
    command.extend(ctx.config.launcher_options.iter().cloned());
    command.push(myself.display().to_string());
    command.push("profile".to_string());
    command.push("detect".to_string());
    command.extend(split.program.iter().cloned());

    if ctx.dry_run {
        println!("{}", command.join(" "));
        return Ok(Default::default());
    }

    debug!("Running detection ranks: {:?}", command);
    let output = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .env(ENV_DETECT_LAUNCHER, &split.launcher[0])
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await?;

    if !output.status.success() {
        error!(
            "Failed to determine necessary libraries: launcher exited with {}",
            output.status.code().unwrap_or(1)
        );
        return Err(Error::CommandFailed(output.status.code().unwrap_or(1)));
    }

    let mut libraries = BTreeSet::new();
    let mut files = BTreeSet::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        match serde_json::from_str::<RankReport>(line) {
            Ok(report) => {
                libraries.extend(report.libraries);
                files.extend(report.files);
            }
            Err(_) => debug!("Ignoring rank output line: {}", line),
        }
    }
    Ok((libraries, files))
}

/// Traces the command in this process and classifies the observations.
/// An empty result is retried once with linker-level logging before giving
/// up.
async fn detect_in_process(
    command: &[String],
) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    let reserved: Vec<PathBuf> = util::getenv(ENV_DETECT_LAUNCHER)
        .map(|launcher| launchers::reserved_directories(&[launcher]))
        .unwrap_or_default();

    for attempt in 0..2 {
        let argv = command.to_vec();
        let outcome =
            tokio::task::spawn_blocking(move || trace::opened_files(&argv))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;

        if outcome.exit_status != 0 {
            warn!(
                "Traced command exited with {}; results may be incomplete",
                outcome.exit_status
            );
        }

        let classified = classify(outcome.paths, &reserved);
        report_rejections(&classified);

        if !classified.libraries.is_empty() || !classified.files.is_empty() {
            let libraries = classified
                .libraries
                .iter()
                .map(|l| l.host_path.clone())
                .collect();
            let files = classified
                .files
                .iter()
                .chain(classified.directories.iter())
                .cloned()
                .collect();
            return Ok((libraries, files));
        }

        if attempt == 0 {
            warn!("No dependencies detected; retrying once");
        }
    }

    Err(Error::TraceUnavailable {
        reason: "tracing produced no usable paths".to_string(),
    })
}

fn report_rejections(classified: &Classification) {
    for (path, reason) in &classified.rejected {
        warn!("Ignoring {}: {}", path.display(), reason);
    }
}

/// Merges the detected sets into the target profile, creating it if
/// needed.
fn save(
    ctx: &Context,
    profile_name: Option<&str>,
    libraries: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
) -> Result<()> {
    let name = match profile_name {
        Some(name) => name.to_string(),
        None => {
            let selected = ctx.store.selected()?.ok_or(Error::NoProfileSelected)?;
            warn!(
                "No profile specified: selected profile '{}' will be updated",
                selected
            );
            selected
        }
    };

    if ctx.store.get(&name).is_err() {
        ctx.store.create(Profile::new(&name), StorageLevel::User)?;
    }

    let count = (libraries.len(), files.len());
    ctx.store.update(&name, |profile| {
        profile.libraries = libraries;
        profile.files = files;
        Ok(())
    })?;

    info!(
        "Profile {} updated: {} libraries, {} files",
        name, count.0, count.1
    );
    Ok(())
}

/// Runs `hostname` under the launcher; a single answering host means the
/// network stack may go unexercised and the detection incomplete.
async fn warn_single_host(launcher: &[String]) {
    let Some(hostname) = util::which("hostname") else {
        return;
    };
    let Some(binary) = launcher.first() else {
        return;
    };

    let Ok(output) = tokio::process::Command::new(binary)
        .args(&launcher[1..])
        .arg(hostname)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    else {
        return;
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let hosts: BTreeSet<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if hosts.len() <= 1 {
        warn!(
            "The launcher appears to target a single host; library \
             detection may miss network libraries. Consider detecting \
             across two or more hosts."
        );
    }
}
