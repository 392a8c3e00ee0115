//! Readers for the text outputs FLASH leaves next to its checkpoints: the
//! `.dat` integral-quantities file, 1-D initial-model profiles, and the run
//! log. A `.dat` file written across restarts repeats its header line, so one
//! file can hold several runs; rows are grouped accordingly.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const HEADER_FIRST_WIDTH: usize = 25;
const HEADER_STRIDE: usize = 26;

fn column_index_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\s*").unwrap())
}

/// A FLASH `.dat` file: named columns plus one row group per run.
#[derive(Debug, Clone)]
pub struct DatFile {
    pub columns: Vec<String>,
    pub runs: Vec<Vec<Vec<f64>>>,
}

impl DatFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read dat file {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let header = text
            .lines()
            .next()
            .filter(|l| l.starts_with('#'))
            .ok_or_else(|| anyhow!("dat file does not start with a header line"))?;
        let columns = parse_header(header);

        let mut runs: Vec<Vec<Vec<f64>>> = Vec::new();
        let mut current: Vec<Vec<f64>> = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                // A repeated header marks the start of the next run.
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
                continue;
            }
            let row = trimmed
                .split_whitespace()
                .map(|field| {
                    field
                        .parse::<f64>()
                        .with_context(|| format!("bad numeric field {field:?}"))
                })
                .collect::<Result<Vec<f64>>>()?;
            if row.len() != columns.len() {
                bail!(
                    "dat row has {} fields, expected {}",
                    row.len(),
                    columns.len()
                );
            }
            current.push(row);
        }
        if !current.is_empty() {
            runs.push(current);
        }
        Ok(Self { columns, runs })
    }

    pub fn rows(&self) -> usize {
        self.runs.iter().map(|run| run.len()).sum()
    }

    fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("no column named {name:?}"))
    }

    /// One column concatenated across all runs, in file order.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_position(name)?;
        Ok(self.runs.iter().flatten().map(|row| row[idx]).collect())
    }

    pub fn run_column(&self, run: usize, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_position(name)?;
        let rows = self
            .runs
            .get(run)
            .ok_or_else(|| anyhow!("no run {run}, file has {}", self.runs.len()))?;
        Ok(rows.iter().map(|row| row[idx]).collect())
    }
}

/// Column names sit in fixed-width fields: the first after the `#`, the rest
/// on a 26-character stride, each prefixed by its column number.
fn parse_header(line: &str) -> Vec<String> {
    let strip = |field: &str| {
        column_index_prefix()
            .replace(field.trim(), "")
            .trim()
            .to_string()
    };
    let n = line.len();
    let mut columns = vec![strip(&line[1..HEADER_FIRST_WIDTH.min(n)])];
    let mut offset = HEADER_STRIDE;
    while offset + HEADER_FIRST_WIDTH < n {
        columns.push(strip(&line[offset..offset + HEADER_FIRST_WIDTH]));
        offset += HEADER_STRIDE;
    }
    if offset < n {
        columns.push(strip(&line[offset..]));
    }
    columns
}

/// Time of core bounce, taken from the first `Bounce!` line of the FLASH log.
pub fn bounce_time(log: &Path) -> Result<Option<f64>> {
    let text = fs::read_to_string(log)
        .with_context(|| format!("cannot read log file {}", log.display()))?;
    for line in text.lines() {
        if line.contains("Bounce!") {
            let field = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| anyhow!("malformed bounce line: {line:?}"))?;
            return Ok(Some(field.parse().context("bad bounce time")?));
        }
    }
    Ok(None)
}

/// A 1-D initial-model profile: radius column plus named variables.
#[derive(Debug, Clone)]
pub struct Profile {
    pub comment: String,
    pub vars: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Profile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read profile {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let comment = match lines.peek() {
            Some(l) if l.starts_with('#') => {
                let c = l.trim_start_matches('#').trim().to_string();
                lines.next();
                c
            }
            _ => String::new(),
        };

        let count_line = lines
            .next()
            .ok_or_else(|| anyhow!("profile is missing the variable-count line"))?;
        if !count_line.to_lowercase().contains("number of variables") {
            bail!("expected `number of variables`, found {count_line:?}");
        }
        let num_vars: usize = count_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("empty variable-count line"))?
            .parse()
            .context("bad variable count")?;

        let mut vars = vec!["r".to_string()];
        for _ in 0..num_vars {
            let name = lines
                .next()
                .and_then(|l| l.split_whitespace().next())
                .ok_or_else(|| anyhow!("fewer variable names than declared"))?;
            vars.push(name.to_string());
        }

        let mut rows = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let row = trimmed
                .split_whitespace()
                .map(|field| {
                    field
                        .parse::<f64>()
                        .with_context(|| format!("bad profile field {field:?}"))
                })
                .collect::<Result<Vec<f64>>>()?;
            if row.len() != vars.len() {
                bail!(
                    "profile row has {} fields, expected {}",
                    row.len(),
                    vars.len()
                );
            }
            rows.push(row);
        }
        Ok(Self {
            comment,
            vars,
            rows,
        })
    }

    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self
            .vars
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| anyhow!("no profile variable named {name:?}"))?;
        Ok(self.rows.iter().filter_map(|r| r.get(idx).copied()).collect())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!("# {}\n", self.comment));
        out.push_str(&format!("number of variables = {}\n", self.vars.len() - 1));
        for var in self.vars.iter().skip(1) {
            out.push_str(var);
            out.push('\n');
        }
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(|v| format!("{v:e}")).collect();
            out.push_str(&fields.join(" "));
            out.push('\n');
        }
        fs::write(path, out)
            .with_context(|| format!("cannot write profile {}", path.display()))
    }
}

/// Mass of a spherical shell of width `dr` centred on `r`.
pub fn shell_mass(r: f64, dr: f64, dens: f64) -> f64 {
    let outer = (r + dr * 0.5).powi(3);
    let inner = (r - dr * 0.5).powi(3);
    (4.0 / 3.0) * std::f64::consts::PI * (outer - inner) * dens
}

const SHOCK_RESAMPLE_POINTS: usize = 1000;

/// Shock trajectory and velocity from the `max_shock_radius` column.
///
/// The raw column holds long runs of repeated values, one per coarse grid
/// cell the shock sits in, so the series is collapsed to the last sample of
/// each run (anchored at the origin) before a linear resample onto
/// [`SHOCK_RESAMPLE_POINTS`] uniform times. The velocity is a finite
/// difference of the resampled radius. Returns `(times, radii, velocities)`.
pub fn shock_velocity(
    time: &[f64],
    max_shock_radius: &[f64],
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    if time.len() != max_shock_radius.len() {
        bail!(
            "time has {} samples, max_shock_radius has {}",
            time.len(),
            max_shock_radius.len()
        );
    }
    if time.len() < 2 {
        bail!("need at least two samples to resample the shock radius");
    }

    let mut knot_times = vec![0.0];
    let mut knot_radii = vec![0.0];
    let mut i = 0;
    while i < max_shock_radius.len() {
        let radius = max_shock_radius[i];
        let mut end = i + 1;
        while end < max_shock_radius.len() && max_shock_radius[end] == radius {
            end += 1;
        }
        knot_times.push(time[end - 1]);
        knot_radii.push(radius);
        i = end;
    }

    let times = linspace(time[0], time[time.len() - 1], SHOCK_RESAMPLE_POINTS);
    let radii: Vec<f64> = times
        .iter()
        .map(|&t| interp(t, &knot_times, &knot_radii))
        .collect();
    let velocities = gradient(&radii, &times);
    Ok((times, radii, velocities))
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    let step = (stop - start) / (n - 1) as f64;
    let mut points: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    points[n - 1] = stop;
    points
}

/// Piecewise-linear interpolation over non-decreasing knots, clamped at the
/// ends.
fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let hi = xs.partition_point(|&p| p < x);
    let lo = hi - 1;
    let t = (x - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + t * (ys[hi] - ys[lo])
}

/// Central differences in the interior, one-sided at the ends.
fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len();
    let mut out = Vec::with_capacity(n);
    out.push((y[1] - y[0]) / (x[1] - x[0]));
    for i in 1..n - 1 {
        out.push((y[i + 1] - y[i - 1]) / (x[i + 1] - x[i - 1]));
    }
    out.push((y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "flash_analysis_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn dat_header(names: &[&str]) -> String {
        let mut line = format!("#{:>24}", names[0]);
        for name in &names[1..] {
            line.push_str(&format!(" {:>25}", name));
        }
        line
    }

    #[test]
    fn header_fields_lose_their_column_numbers() {
        let header = dat_header(&["1 time", "2 mass", "3 max_shock_radius"]);
        assert_eq!(
            parse_header(&header),
            vec!["time", "mass", "max_shock_radius"]
        );
    }

    #[test]
    fn restart_headers_split_the_file_into_runs() {
        let header = dat_header(&["1 time", "2 mass"]);
        let text = format!(
            "{header}\n1.0 10.0\n2.0 20.0\n{header}\n2.5 25.0\n3.0 30.0\n4.0 40.0\n"
        );
        let dat = DatFile::parse(&text).expect("parse");
        assert_eq!(dat.runs.len(), 2);
        assert_eq!(dat.runs[0].len(), 2);
        assert_eq!(dat.runs[1].len(), 3);
        assert_eq!(dat.rows(), 5);
        assert_eq!(dat.column("time").expect("time"), vec![1.0, 2.0, 2.5, 3.0, 4.0]);
        assert_eq!(dat.run_column(1, "mass").expect("mass"), vec![25.0, 30.0, 40.0]);
    }

    #[test]
    fn missing_header_is_an_error() {
        assert!(DatFile::parse("1.0 2.0\n").is_err());
        assert!(DatFile::parse("").is_err());
    }

    #[test]
    fn dat_rejects_ragged_rows() {
        let header = dat_header(&["1 time", "2 mass"]);
        assert!(DatFile::parse(&format!("{header}\n1.0 10.0\n2.0\n")).is_err());
        assert!(DatFile::parse(&format!("{header}\n1.0 10.0 99.0\n")).is_err());
    }

    #[test]
    fn bounce_time_finds_the_marker_line() {
        let dir = temp_dir("bounce");
        let log = dir.join("run.log");
        fs::write(
            &log,
            "step 100 t=0.1\nBounce! 0.2753 central dens 3.1e14\nstep 101 t=0.3\n",
        )
        .expect("log");
        assert_eq!(bounce_time(&log).expect("read"), Some(0.2753));

        fs::write(&log, "step 100 t=0.1\n").expect("log");
        assert_eq!(bounce_time(&log).expect("read"), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn profile_parses_and_writes_back() {
        let text = "\
# wd model, 1.0 Msun
number of variables = 2
dens
temp
1.0e7 1.0e9 5.0e8
2.0e7 0.5e9 4.0e8
";
        let profile = Profile::parse(text).expect("parse");
        assert_eq!(profile.vars, vec!["r", "dens", "temp"]);
        assert_eq!(profile.rows.len(), 2);
        assert_eq!(profile.column("dens").expect("dens"), vec![1.0e9, 0.5e9]);

        let dir = temp_dir("profile");
        let path = dir.join("profile.flash");
        profile.write(&path).expect("write");
        let reread = Profile::read(&path).expect("reread");
        assert_eq!(reread.vars, profile.vars);
        assert_eq!(reread.rows, profile.rows);
        assert_eq!(reread.comment, profile.comment);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn profile_rejects_ragged_rows() {
        let text = "number of variables = 1\ndens\n1.0 2.0 3.0\n";
        assert!(Profile::parse(text).is_err());
    }

    #[test]
    fn shock_velocity_collapses_plateaus_and_recovers_the_slope() {
        // Repeated radii on a constant-velocity trajectory r = 5t: after the
        // duplicate runs collapse to their last sample, every knot sits on
        // the line and the resampled velocity is uniform.
        let time = [1.0, 2.0, 3.0, 4.0];
        let radius = [10.0, 10.0, 15.0, 20.0];
        let (times, radii, velocities) = shock_velocity(&time, &radius).expect("resample");
        assert_eq!(times.len(), SHOCK_RESAMPLE_POINTS);
        assert_eq!(times[0], 1.0);
        assert_eq!(times[times.len() - 1], 4.0);
        assert!((radii[0] - 5.0).abs() < 1e-9);
        assert!((radii[radii.len() - 1] - 20.0).abs() < 1e-9);
        for v in &velocities {
            assert!((v - 5.0).abs() < 1e-9, "velocity {v} off the 5.0 slope");
        }
    }

    #[test]
    fn shock_velocity_rejects_degenerate_input() {
        assert!(shock_velocity(&[1.0, 2.0], &[1.0]).is_err());
        assert!(shock_velocity(&[1.0], &[1.0]).is_err());
    }

    #[test]
    fn shell_mass_matches_the_analytic_sphere() {
        // unit-density shell spanning [0.5, 1.5]
        let m = shell_mass(1.0, 1.0, 1.0);
        let expected = (4.0 / 3.0) * std::f64::consts::PI * (1.5f64.powi(3) - 0.5f64.powi(3));
        assert!((m - expected).abs() < 1e-12);
    }
}
