//! Job-side plumbing: scheduler-provided context, archiving of the SLURM
//! stdout log under `logs/`, and JSON submission records.

use crate::restart::{RestartPlan, ResumePoint};
use crate::{Result, RunnerError};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Environment the scheduler hands to the job. Read-only; anything missing
/// just stays out of the log line.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub job_id: Option<String>,
    pub nodelist: Option<String>,
    pub partition: Option<String>,
    pub ntasks: Option<String>,
    pub cpus_on_node: Option<String>,
}

impl JobContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            job_id: lookup("SLURM_JOB_ID"),
            nodelist: lookup("SLURM_JOB_NODELIST"),
            partition: lookup("SLURM_JOB_PARTITION"),
            ntasks: lookup("SLURM_NTASKS"),
            cpus_on_node: lookup("SLURM_CPUS_ON_NODE"),
        }
    }

    pub fn log(&self) {
        info!(
            job_id = self.job_id.as_deref().unwrap_or("?"),
            nodelist = self.nodelist.as_deref().unwrap_or("?"),
            partition = self.partition.as_deref().unwrap_or("?"),
            ntasks = self.ntasks.as_deref().unwrap_or("?"),
            cpus_on_node = self.cpus_on_node.as_deref().unwrap_or("?"),
            "job context"
        );
    }
}

pub fn submission_stamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H%M").to_string()
}

/// First free path of the form `<stem>.<ext>`, `<stem>.1.<ext>`, … so two
/// submissions in the same minute keep distinct files.
fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}.{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Hard-link the scheduler's stdout log into `logs/`, named by simulation
/// name and submission time. The link shares the inode, so the copy keeps
/// accumulating output while the job runs.
pub fn archive_log(logs_dir: &Path, sim_name: &str, stamp: &str, source: &Path) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir)?;
    let dest = unique_path(logs_dir, &format!("{sim_name}_{stamp}"), "log");
    fs::hard_link(source, &dest)?;
    Ok(dest)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Serialize)]
pub struct SubmissionRecord {
    pub job_id: u64,
    pub sim_name: String,
    pub bin: String,
    pub bin_sha256: Option<String>,
    pub par_file: String,
    pub mode: String,
    pub resume: Option<ResumePoint>,
}

impl SubmissionRecord {
    pub fn new(
        job_id: u64,
        sim_name: &str,
        opts: &crate::submit::SubmitOptions,
        plan: Option<&RestartPlan>,
    ) -> Self {
        let (mode, resume) = match plan {
            None => ("disabled", None),
            Some(RestartPlan::Resume(point)) => ("resume", Some(point.clone())),
            Some(RestartPlan::NoExistingRun) | Some(RestartPlan::NoMatchingRun { .. }) => {
                ("fresh-start", None)
            }
        };
        let bin_sha256 = match sha256_file(&opts.bin) {
            Ok(digest) => Some(digest),
            Err(err) => {
                debug!(error = %err, "could not digest binary for record");
                None
            }
        };
        Self {
            job_id,
            sim_name: sim_name.to_string(),
            bin: opts.bin.display().to_string(),
            bin_sha256,
            par_file: opts.par_file.display().to_string(),
            mode: mode.to_string(),
            resume,
        }
    }
}

/// Drop a one-object JSON record next to the archived logs.
pub fn write_submission_record(
    logs_dir: &Path,
    record: &SubmissionRecord,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir)?;
    let stamp = submission_stamp(now);
    let path = unique_path(logs_dir, &format!("{}_{stamp}", record.sim_name), "json");
    let payload = json!({
        "submitted_at": now.to_rfc3339(),
        "record": record,
    });
    fs::write(&path, serde_json::to_vec_pretty(&payload).map_err(std::io::Error::other)?)?;
    Ok(path)
}

/// Entry point for the batch script: log the allocation, archive the
/// scheduler log, launch the binary under `srun` and report its status.
pub fn run_job(bin: &Path, par_file: &Path, sim_name: &str) -> Result<i32> {
    if !crate::submit::check_executable(bin)? {
        return Err(RunnerError::BinaryNotExecutable(bin.to_path_buf()));
    }
    if !par_file.is_file() {
        return Err(RunnerError::ParameterFileNotFound(par_file.to_path_buf()));
    }

    let ctx = JobContext::from_env();
    ctx.log();

    if let Some(job_id) = &ctx.job_id {
        let source = PathBuf::from(format!("slurm-{job_id}.out"));
        if source.is_file() {
            let stamp = submission_stamp(Local::now());
            match archive_log(Path::new("logs"), sim_name, &stamp, &source) {
                Ok(dest) => info!(log = %dest.display(), "scheduler log archived"),
                Err(err) => warn!(error = %err, "could not archive scheduler log"),
            }
        } else {
            debug!(source = %source.display(), "scheduler log not found, skipping archive");
        }
    }

    let status = Command::new("srun")
        .arg(bin)
        .arg("-par_file")
        .arg(par_file)
        .status()?;
    let code = status.code().unwrap_or(-1);
    info!(code, "simulation finished");
    Ok(code)
}
