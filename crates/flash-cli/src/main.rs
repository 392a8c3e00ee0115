use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use flash_runner::{RestartPlan, SubmitOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "flashsub",
    version,
    about = "Submit and manage FLASH simulation jobs under SLURM"
)]
struct Cli {
    /// Chatty logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the inputs, patch the parameter file for auto-restart and
    /// enqueue the job with sbatch
    Submit {
        /// Simulation binary
        #[arg(long, default_value = "flash4")]
        bin: PathBuf,
        /// FLASH parameter file
        #[arg(long = "par-file", default_value = "flash.par")]
        par_file: PathBuf,
        /// Batch script handed to sbatch
        #[arg(long = "job-script", default_value = "flash.sbatch")]
        job_script: PathBuf,
        /// Job name; defaults to the parameter file's basenm
        #[arg(long = "sim-name")]
        sim_name: Option<String>,
        /// Resume from the latest valid checkpoint when one exists
        #[arg(
            long = "auto-restart",
            value_name = "WHEN",
            action = clap::ArgAction::Set,
            num_args = 0..=1,
            default_value = "on",
            default_missing_value = "on",
            value_parser = parse_switch,
        )]
        auto_restart: bool,
        /// Shorthand for --auto-restart=off
        #[arg(long = "no-auto-restart")]
        no_auto_restart: bool,
        /// Ask before submitting
        #[arg(short, long)]
        confirm: bool,
    },
    /// Run inside the allocation: log the job context, archive the scheduler
    /// log and launch the binary via srun
    Job {
        #[arg(short, long, default_value = "flash4")]
        bin: PathBuf,
        #[arg(long = "par-file", default_value = "flash.par")]
        par_file: PathBuf,
        #[arg(long = "sim-name", default_value = "flash")]
        sim_name: String,
    },
    /// Summarize a FLASH .dat file
    Dat {
        file: PathBuf,
        /// Also report the bounce time from this FLASH log file
        #[arg(long = "bounce-log")]
        bounce_log: Option<PathBuf>,
    },
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "enable" | "yes" | "1" => Ok(true),
        "false" | "off" | "disable" | "no" | "0" => Ok(false),
        other => Err(format!(
            "invalid value '{other}' (expected true/false, on/off or enable/disable)"
        )),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version are clean exits; everything else is a usage
            // error and exits 1.
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run_command(cli.command) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Submit {
            bin,
            par_file,
            job_script,
            sim_name,
            auto_restart,
            no_auto_restart,
            confirm,
        } => {
            let opts = SubmitOptions {
                bin,
                par_file,
                job_script,
                sim_name,
                auto_restart: auto_restart && !no_auto_restart,
            };
            if confirm {
                let prompt = format!(
                    "submit {} with {}?",
                    opts.bin.display(),
                    opts.par_file.display()
                );
                if !ask(&prompt)? {
                    println!("not submitted");
                    return Ok(());
                }
            }
            let submission = flash_runner::submit::submit(&opts)?;
            println!("sim_name: {}", submission.sim_name);
            println!("restart: {}", describe_plan(submission.plan.as_ref()));
            println!("job_id: {}", submission.job_id);
            if let Some(record) = &submission.record {
                println!("record: {}", record.display());
            }
        }
        Commands::Job {
            bin,
            par_file,
            sim_name,
        } => {
            let code = flash_runner::joblog::run_job(&bin, &par_file, &sim_name)?;
            if code != 0 {
                process::exit(code);
            }
        }
        Commands::Dat { file, bounce_log } => {
            let dat = flash_analysis::DatFile::read(&file)?;
            println!("file: {}", file.display());
            println!("runs: {}", dat.runs.len());
            println!("rows: {}", dat.rows());
            println!("columns: {}", dat.columns.join(", "));
            if let Some(log) = bounce_log {
                match flash_analysis::bounce_time(&log)? {
                    Some(t) => println!("bounce_time: {t}"),
                    None => println!("bounce_time: not reached"),
                }
            }
        }
    }
    Ok(())
}

fn describe_plan(plan: Option<&RestartPlan>) -> String {
    match plan {
        None => "disabled".to_string(),
        Some(RestartPlan::NoExistingRun) => "fresh start (no previous run)".to_string(),
        Some(RestartPlan::NoMatchingRun { present }) => {
            format!("fresh start (no match; found {})", present.join(", "))
        }
        Some(RestartPlan::Resume(point)) => format!(
            "resume from {} (plot index {}{})",
            point.checkpoint,
            point.next_plot_index,
            if point.fell_back {
                ", previous checkpoint after size check"
            } else {
                ""
            }
        ),
    }
}

fn ask(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_restart_accepts_every_documented_spelling() {
        for value in ["true", "on", "enable", "ON"] {
            assert_eq!(parse_switch(value), Ok(true), "{value}");
        }
        for value in ["false", "off", "disable", "Off"] {
            assert_eq!(parse_switch(value), Ok(false), "{value}");
        }
        assert!(parse_switch("maybe").is_err());
    }

    #[test]
    fn bare_auto_restart_flag_means_on() {
        let cli = Cli::try_parse_from(["flashsub", "submit", "--auto-restart"]).expect("parse");
        match cli.command {
            Commands::Submit {
                auto_restart,
                no_auto_restart,
                ..
            } => {
                assert!(auto_restart);
                assert!(!no_auto_restart);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn no_auto_restart_overrides_the_default() {
        let cli = Cli::try_parse_from(["flashsub", "submit", "--no-auto-restart"]).expect("parse");
        match cli.command {
            Commands::Submit {
                auto_restart,
                no_auto_restart,
                ..
            } => assert!(auto_restart && no_auto_restart),
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn unknown_flags_are_usage_errors() {
        let err = Cli::try_parse_from(["flashsub", "submit", "--frobnicate"]).unwrap_err();
        assert_ne!(
            err.kind(),
            ErrorKind::DisplayHelp,
            "unknown flag must not fall through to help"
        );
    }
}
