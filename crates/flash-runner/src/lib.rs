pub mod joblog;
pub mod parfile;
pub mod restart;
pub mod submit;

use std::path::PathBuf;
use thiserror::Error;

pub use parfile::ParameterSet;
pub use restart::{CheckpointCandidate, RestartPlan, ResumePoint};
pub use submit::{Submission, SubmitOptions};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("binary not found: {0}")]
    BinaryNotFound(PathBuf),
    #[error("binary is not executable: {0}")]
    BinaryNotExecutable(PathBuf),
    #[error("parameter file not found: {0}")]
    ParameterFileNotFound(PathBuf),
    #[error("job script not found: {0}")]
    JobScriptNotFound(PathBuf),
    #[error("parameter `{key}` not present in {path}")]
    MissingParameter { key: String, path: PathBuf },
    #[error("cannot read output directory {path}: {source}")]
    OutputDirUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sbatch exited with status {status}: {detail}")]
    SbatchFailed { status: i32, detail: String },
    #[error("sbatch output carried no job id: {0:?}")]
    MissingJobId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
