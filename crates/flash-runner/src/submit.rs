//! Submission dispatcher: preflight the inputs, optionally patch the
//! parameter file for auto-restart, and hand the job to `sbatch`.

use crate::joblog::{self, SubmissionRecord};
use crate::parfile::ParameterSet;
use crate::restart::{self, RestartPlan};
use crate::{Result, RunnerError};
use chrono::Local;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Everything a submission needs, threaded explicitly instead of living in
/// ambient state.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub bin: PathBuf,
    pub par_file: PathBuf,
    pub job_script: PathBuf,
    pub sim_name: Option<String>,
    pub auto_restart: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("flash4"),
            par_file: PathBuf::from("flash.par"),
            job_script: PathBuf::from("flash.sbatch"),
            sim_name: None,
            auto_restart: true,
        }
    }
}

#[derive(Debug)]
pub struct Submission {
    pub job_id: u64,
    pub sim_name: String,
    pub plan: Option<RestartPlan>,
    pub record: Option<PathBuf>,
}

pub fn check_executable(path: &Path) -> Result<bool> {
    if !path.is_file() {
        return Err(RunnerError::BinaryNotFound(path.to_path_buf()));
    }
    let metadata = File::open(path)?.metadata()?;
    Ok((metadata.mode() & 0o111) != 0)
}

fn preflight(opts: &SubmitOptions) -> Result<()> {
    if !check_executable(&opts.bin)? {
        return Err(RunnerError::BinaryNotExecutable(opts.bin.clone()));
    }
    if !opts.par_file.is_file() {
        return Err(RunnerError::ParameterFileNotFound(opts.par_file.clone()));
    }
    if !opts.job_script.is_file() {
        return Err(RunnerError::JobScriptNotFound(opts.job_script.clone()));
    }
    Ok(())
}

fn resolve_sim_name(opts: &SubmitOptions, params: &ParameterSet) -> String {
    opts.sim_name
        .clone()
        .or_else(|| {
            params
                .basenm
                .as_ref()
                .map(|b| b.trim_end_matches('_').to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "flash".to_string())
}

fn parse_job_id(stdout: &str) -> Option<u64> {
    // sbatch reports "Submitted batch job <id>" on its last non-empty line.
    stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())?
        .split_whitespace()
        .last()?
        .parse()
        .ok()
}

/// Decide whether to resume and patch the parameter file accordingly. Soft
/// outcomes leave the file alone; only filesystem errors propagate.
fn prepare_restart(opts: &SubmitOptions, params: &ParameterSet) -> Result<Option<RestartPlan>> {
    if !opts.auto_restart {
        debug!("auto-restart disabled, leaving parameter file alone");
        return Ok(None);
    }
    let Some(basenm) = params.basenm.as_deref() else {
        warn!(
            par_file = %opts.par_file.display(),
            "parameter file has no basenm, skipping auto-restart"
        );
        return Ok(None);
    };
    // FLASH writes into the working directory when output_directory is unset.
    let output_dir = match params.output_directory.as_deref() {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => opts
            .par_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };

    let plan = restart::plan_restart(&output_dir, basenm)?;
    match &plan {
        RestartPlan::Resume(point) => {
            info!(
                checkpoint = %point.checkpoint,
                plot_index = point.next_plot_index,
                fell_back = point.fell_back,
                "resuming from checkpoint"
            );
            restart::apply(&opts.par_file, point)?;
        }
        RestartPlan::NoExistingRun => {
            info!("no previous run in {}, starting fresh", output_dir.display());
        }
        RestartPlan::NoMatchingRun { present } => {
            info!(
                present = ?present,
                basenm,
                "no checkpoints for this basename, starting fresh"
            );
        }
    }
    Ok(Some(plan))
}

/// Validate, plan the restart, and enqueue the job. Returns the scheduler's
/// job id on success.
pub fn submit(opts: &SubmitOptions) -> Result<Submission> {
    preflight(opts)?;
    let params = ParameterSet::read(&opts.par_file)?;
    let sim_name = resolve_sim_name(opts, &params);
    let plan = prepare_restart(opts, &params)?;

    let output = Command::new("sbatch")
        .arg(format!("--job-name={sim_name}"))
        .arg(&opts.job_script)
        .arg("--bin")
        .arg(&opts.bin)
        .arg("--par-file")
        .arg(&opts.par_file)
        .arg("--sim-name")
        .arg(&sim_name)
        .output()?;

    if !output.status.success() {
        let detail = String::from_utf8_lossy(&output.stderr)
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("sbatch produced no diagnostic")
            .to_string();
        return Err(RunnerError::SbatchFailed {
            status: output.status.code().unwrap_or(-1),
            detail,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let job_id = parse_job_id(&stdout).ok_or(RunnerError::MissingJobId(stdout))?;
    info!(job_id, sim_name = %sim_name, "job enqueued");

    let record = SubmissionRecord::new(job_id, &sim_name, opts, plan.as_ref());
    let record_path = match joblog::write_submission_record(Path::new("logs"), &record, Local::now())
    {
        Ok(path) => Some(path),
        Err(err) => {
            // The job is already queued; a failed record is not worth a
            // non-zero exit.
            warn!(error = %err, "failed to write submission record");
            None
        }
    };

    Ok(Submission {
        job_id,
        sim_name,
        plan,
        record: record_path,
    })
}
