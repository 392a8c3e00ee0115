//! First-match reading and in-place rewriting of FLASH parameter files.
//!
//! The `.par` format is loosely line-oriented `key = value` text. There is no
//! schema: the first textual match for a key governs, duplicates and malformed
//! lines are left alone, and rewrites touch nothing but the matched value.

use crate::{Result, RunnerError};
use regex::{Regex, RegexBuilder};
use std::fs;
use std::path::Path;

/// The handful of parameters the submission flow cares about, read fresh from
/// disk on every call. The file itself stays the source of truth.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    pub output_directory: Option<String>,
    pub basenm: Option<String>,
    pub restart: Option<String>,
    pub checkpoint_file_number: Option<String>,
    pub plot_file_number: Option<String>,
}

impl ParameterSet {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RunnerError::ParameterFileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        Self {
            output_directory: lookup(text, "output_directory"),
            basenm: lookup(text, "basenm"),
            restart: lookup(text, "restart"),
            checkpoint_file_number: lookup(text, "checkpointFileNumber"),
            plot_file_number: lookup(text, "plotFileNumber"),
        }
    }
}

fn key_line(key: &str) -> Regex {
    // FLASH runtime parameter names are case-insensitive. The value capture
    // stops before a trailing `#` comment so rewrites leave the comment alone.
    RegexBuilder::new(&format!(
        r"^([ \t]*{}[ \t]*=[ \t]*)([^#\r\n]*?)([ \t]*(?:#[^\r\n]*)?)$",
        regex::escape(key)
    ))
    .multi_line(true)
    .case_insensitive(true)
    .build()
    .unwrap()
}

/// First-match search for `key = value`; the raw value is stripped of
/// surrounding double quotes, trailing `#` comments never reach it.
pub fn lookup(text: &str, key: &str) -> Option<String> {
    let caps = key_line(key).captures(text)?;
    let value = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some(value.to_string())
}

/// Replace the value of the first line matching `key`, leaving the key
/// spelling, its indentation, any trailing comment and every other byte of
/// the file untouched. Returns `None` when the key is absent.
pub fn rewrite(text: &str, key: &str, value: &str) -> Option<String> {
    let re = key_line(key);
    let m = re.captures(text)?;
    let prefix = m.get(1).unwrap();
    let old_value = m.get(2).unwrap();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..prefix.end()]);
    out.push_str(value);
    out.push_str(&text[old_value.end()..]);
    Some(out)
}

/// Apply a set of first-match substitutions to the file on disk. The file is
/// re-read immediately before patching; any missing key aborts before writing.
pub fn rewrite_file(path: &Path, updates: &[(&str, String)]) -> Result<()> {
    let mut text = fs::read_to_string(path)?;
    for (key, value) in updates {
        text = rewrite(&text, key, value).ok_or_else(|| RunnerError::MissingParameter {
            key: key.to_string(),
            path: path.to_path_buf(),
        })?;
    }
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAR: &str = "\
# core collapse setup
basenm   = \"ccsn_\"
output_directory = \"output\"

restart  = .false.
checkpointFileNumber = 0
plotFileNumber       = 0   # next plt_cnt index
nend = 1000000
";

    #[test]
    fn lookup_strips_quotes_and_comments() {
        assert_eq!(lookup(PAR, "basenm").as_deref(), Some("ccsn_"));
        assert_eq!(lookup(PAR, "output_directory").as_deref(), Some("output"));
        assert_eq!(lookup(PAR, "plotFileNumber").as_deref(), Some("0"));
        assert_eq!(lookup(PAR, "restart").as_deref(), Some(".false."));
        assert_eq!(lookup(PAR, "missing_key"), None);
    }

    #[test]
    fn lookup_is_case_insensitive_and_first_match_wins() {
        let text = "CheckpointFileNumber = 7\ncheckpointFileNumber = 9\n";
        assert_eq!(lookup(text, "checkpointFileNumber").as_deref(), Some("7"));
    }

    #[test]
    fn rewrite_preserves_every_other_line_verbatim() {
        let patched = rewrite(PAR, "checkpointFileNumber", "42").expect("key present");
        for (old, new) in PAR.lines().zip(patched.lines()) {
            if old.starts_with("checkpointFileNumber") {
                assert_eq!(new, "checkpointFileNumber = 42");
            } else {
                assert_eq!(old, new);
            }
        }
        assert_eq!(PAR.lines().count(), patched.lines().count());
    }

    #[test]
    fn rewrite_keeps_indentation_and_key_spelling() {
        let text = "  Restart  =  .false.\n";
        let patched = rewrite(text, "restart", ".true.").expect("key present");
        assert_eq!(patched, "  Restart  =  .true.\n");
    }

    #[test]
    fn rewrite_keeps_trailing_comments() {
        let patched = rewrite(PAR, "plotFileNumber", "7").expect("key present");
        assert!(patched.contains("plotFileNumber       = 7   # next plt_cnt index\n"));
    }

    #[test]
    fn rewrite_only_touches_first_occurrence() {
        let text = "plotFileNumber = 1\nplotFileNumber = 2\n";
        let patched = rewrite(text, "plotFileNumber", "5").expect("key present");
        assert_eq!(patched, "plotFileNumber = 5\nplotFileNumber = 2\n");
    }

    #[test]
    fn rewrite_missing_key_is_none() {
        assert!(rewrite(PAR, "no_such_key", "1").is_none());
    }
}
