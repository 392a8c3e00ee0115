//! Checkpoint selection for auto-restart.
//!
//! Given the output directory and the configured `basenm`, pick the checkpoint
//! to resume from and the next plot-file index, then patch the parameter file.
//! The mtime-ordered plot correlation is fragile under clock skew or copied
//! files; treat a retained legacy checkpoint with a fresher mtime than its
//! paired plot file as suspect.

use crate::{parfile, Result, RunnerError};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

fn chk_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*_)hdf5_chk_([0-9]+)$").unwrap())
}

fn plt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*_)hdf5_plt_cnt_([0-9]+)$").unwrap())
}

/// A discovered checkpoint file with the index parsed from its name suffix.
#[derive(Debug, Clone)]
pub struct CheckpointCandidate {
    pub name: String,
    pub index: u32,
    pub size: u64,
}

/// Checkpoint and plot indices to resume from.
#[derive(Debug, Clone, Serialize)]
pub struct ResumePoint {
    pub checkpoint: String,
    pub checkpoint_index: u32,
    pub next_plot_index: u32,
    /// The newest checkpoint was smaller than its predecessor and was skipped
    /// as likely truncated.
    pub fell_back: bool,
}

/// Outcome of scanning the output directory. The two terminal variants are
/// soft: the run starts fresh and the parameter file stays untouched.
#[derive(Debug, Clone)]
pub enum RestartPlan {
    NoExistingRun,
    NoMatchingRun { present: Vec<String> },
    Resume(ResumePoint),
}

fn checkpoint_parts(name: &str) -> Option<(String, u32)> {
    let caps = chk_pattern().captures(name)?;
    let index = caps.get(2)?.as_str().parse().ok()?;
    Some((caps.get(1)?.as_str().to_string(), index))
}

fn plot_index(name: &str, basenm: &str) -> Option<u32> {
    let caps = plt_pattern().captures(name)?;
    if caps.get(1)?.as_str() != basenm {
        return None;
    }
    caps.get(2)?.as_str().parse().ok()
}

/// Scan the output directory and decide how, and whether, to resume.
pub fn plan_restart(output_dir: &Path, basenm: &str) -> Result<RestartPlan> {
    let mut entries: Vec<(String, u64, SystemTime)> = Vec::new();
    for entry in WalkDir::new(output_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| RunnerError::OutputDirUnreadable {
            path: output_dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| RunnerError::OutputDirUnreadable {
            path: output_dir.to_path_buf(),
            source: e.into(),
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        let mtime = meta.modified()?;
        entries.push((name, meta.len(), mtime));
    }

    let present: BTreeSet<String> = entries
        .iter()
        .filter_map(|(name, _, _)| checkpoint_parts(name).map(|(base, _)| base))
        .collect();

    let mut candidates: Vec<CheckpointCandidate> = entries
        .iter()
        .filter_map(|(name, size, _)| {
            let (base, index) = checkpoint_parts(name)?;
            (base == basenm).then(|| CheckpointCandidate {
                name: name.clone(),
                index,
                size: *size,
            })
        })
        .collect();

    if present.is_empty() {
        debug!(dir = %output_dir.display(), "no checkpoint files found, starting fresh");
        return Ok(RestartPlan::NoExistingRun);
    }
    if !present.contains(basenm) {
        debug!(
            basenm,
            present = ?present,
            "no checkpoints for this basename, starting fresh"
        );
        return Ok(RestartPlan::NoMatchingRun {
            present: present.into_iter().collect(),
        });
    }

    // Numeric-aware ordering: the parsed index governs, the raw name breaks
    // ties deterministically.
    candidates.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
    let latest = candidates.last().expect("basename was present").clone();

    let mut chosen = latest.clone();
    let mut fell_back = false;
    if candidates.len() >= 2 {
        let previous = &candidates[candidates.len() - 2];
        // A checkpoint smaller than its predecessor is taken as truncated by a
        // mid-write abort. A smaller-but-valid file trips this too; size is a
        // heuristic, not a validity check.
        if latest.size < previous.size {
            warn!(
                latest = %latest.name,
                latest_size = latest.size,
                previous = %previous.name,
                previous_size = previous.size,
                "newest checkpoint looks truncated, falling back to previous"
            );
            chosen = previous.clone();
            fell_back = true;
        }
    }

    // Entries newest-first by mtime; name order breaks equal-mtime ties.
    let mut by_mtime = entries;
    by_mtime.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));
    let newest_first: Vec<String> = by_mtime.into_iter().map(|(name, _, _)| name).collect();
    let next_plot = next_plot_index(&newest_first, &chosen.name, basenm);

    Ok(RestartPlan::Resume(ResumePoint {
        checkpoint: chosen.name.clone(),
        checkpoint_index: chosen.index,
        next_plot_index: next_plot,
        fell_back,
    }))
}

/// Walk a newest-first listing past the chosen checkpoint and return the
/// parsed index of the next plot file, plus one. Separated from the
/// filesystem so orderings can be substituted in tests.
pub fn next_plot_index(newest_first: &[String], checkpoint: &str, basenm: &str) -> u32 {
    let mut seen_checkpoint = false;
    for name in newest_first {
        if !seen_checkpoint {
            seen_checkpoint = name == checkpoint;
            continue;
        }
        if let Some(index) = plot_index(name, basenm) {
            return index + 1;
        }
    }
    0
}

/// Patch `restart`, `checkpointFileNumber` and `plotFileNumber` in place so
/// the next run resumes from the selected point.
pub fn apply(par_file: &Path, point: &ResumePoint) -> Result<()> {
    parfile::rewrite_file(
        par_file,
        &[
            ("restart", ".true.".to_string()),
            ("checkpointFileNumber", point.checkpoint_index.to_string()),
            ("plotFileNumber", point.next_plot_index.to_string()),
        ],
    )
}
