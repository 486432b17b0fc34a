#![deny(warnings)]

//! Headless driver: evaluate one substrate size, or sweep a grid of sizes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sizing_core::{straight_line_depreciation, Scenario, ScenarioSet, Substrate};
use sizing_solver::{
    evaluate, sweep, CancelToken, EvaluationRequest, GridAxis, PolicyConfig, Report, SolverConfig,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Grid axes; either may be omitted to use the default.
#[derive(Debug, Deserialize)]
struct GridConfig {
    #[serde(default = "default_widths")]
    widths: GridAxis,
    #[serde(default = "default_heights")]
    heights: GridAxis,
}

fn default_widths() -> GridAxis {
    GridAxis::DEFAULT_WIDTHS
}

fn default_heights() -> GridAxis {
    GridAxis::DEFAULT_HEIGHTS
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            widths: default_widths(),
            heights: default_heights(),
        }
    }
}

/// Run description loaded from YAML.
#[derive(Debug, Deserialize)]
struct RunConfig {
    /// JSON scenario collection, relative to the config file.
    scenarios: PathBuf,
    /// Derive depreciation from investment when a scenario omits it.
    #[serde(default)]
    depreciation_years: Option<u32>,
    policy: PolicyConfig,
    /// Evaluate a single size instead of the grid.
    #[serde(default)]
    substrate: Option<Substrate>,
    #[serde(default)]
    grid: Option<GridConfig>,
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    solver: SolverConfig,
}

const USAGE: &str = "usage: substrate-sizing --config <run.yaml> [--width <m> --height <m>]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
}

fn parse_length(flag: &str, value: Option<String>) -> Result<f64> {
    let Some(value) = value else {
        bail!("{flag} needs a value in metres");
    };
    value
        .parse()
        .with_context(|| format!("{flag} expects a number of metres, got {value:?}"))
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => match it.next() {
                Some(path) => out.config = Some(path),
                None => bail!("--config needs a path\n{USAGE}"),
            },
            "--width" => out.width = Some(parse_length("--width", it.next())?),
            "--height" => out.height = Some(parse_length("--height", it.next())?),
            other => bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }
    Ok(out)
}

/// Revision and date this binary was built from, stamped by `build.rs`.
#[derive(Debug, Serialize)]
struct BuildStamp {
    git_sha: &'static str,
    build_date: &'static str,
}

const BUILD: BuildStamp = BuildStamp {
    git_sha: env!("GIT_SHA"),
    build_date: env!("BUILD_DATE"),
};

/// Single-size output: the report plus the build that produced it.
#[derive(Serialize)]
struct RunOutput<'a> {
    build: &'a BuildStamp,
    #[serde(flatten)]
    report: &'a Report,
}

/// Fill missing depreciation series, then validate the collection.
fn prepare_scenarios(mut scenarios: Vec<Scenario>, years: Option<u32>) -> Result<ScenarioSet> {
    if let Some(years) = years {
        for s in scenarios.iter_mut().filter(|s| s.depreciation.is_empty()) {
            s.depreciation = straight_line_depreciation(&s.investment, years)?;
        }
    }
    Ok(ScenarioSet::new(scenarios)?)
}

fn load_scenarios(path: &Path, years: Option<u32>) -> Result<ScenarioSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenarios from {}", path.display()))?;
    let scenarios: Vec<Scenario> = serde_json::from_str(&text)
        .with_context(|| format!("parsing scenarios from {}", path.display()))?;
    prepare_scenarios(scenarios, years)
}

fn load_config(path: &str) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    let mut cfg: RunConfig = serde_yaml::from_str(&text).with_context(|| format!("parsing config {path}"))?;
    if cfg.scenarios.is_relative() {
        if let Some(dir) = Path::new(path).parent() {
            cfg.scenarios = dir.join(&cfg.scenarios);
        }
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the report.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let Some(config_path) = args.config else {
        bail!(USAGE);
    };
    info!(git_sha = BUILD.git_sha, build_date = BUILD.build_date, config = %config_path, "starting");

    let cfg = load_config(&config_path)?;
    let policy = cfg.policy.to_policy()?;
    cfg.solver.time_limit()?;
    let set = load_scenarios(&cfg.scenarios, cfg.depreciation_years)?;
    info!(
        scenarios = set.len(),
        products = set.product_count(),
        periods = set.horizon(),
        %policy,
        "scenario set loaded"
    );

    let substrate = match (args.width, args.height, cfg.substrate) {
        (Some(w), Some(h), _) => Some(Substrate::new(w, h)),
        (None, None, s) => s,
        _ => bail!("--width and --height must be given together"),
    };
    let cancel = CancelToken::new();

    if let Some(substrate) = substrate {
        let request = EvaluationRequest {
            substrate,
            policy,
            verbose: cfg.verbose,
        };
        let report = evaluate(&set, &request, &cfg.solver, &cancel)?;
        info!(
            expected_npv = report.expected_npv,
            negative_scenarios = report.negative_scenarios,
            status = ?report.status,
            "evaluation finished"
        );
        let output = RunOutput {
            build: &BUILD,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let grid_cfg = cfg.grid.unwrap_or_default();
        let grid = sweep(&set, &grid_cfg.widths, &grid_cfg.heights, &policy, &cfg.solver, &cancel)?;
        grid.write_csv(io::stdout().lock())?;
        if let Some((best, npv)) = grid.best() {
            info!(%best, npv, "best substrate");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_defaults() {
        let cfg: RunConfig = serde_yaml::from_str("scenarios: s.json\npolicy:\n  selector: 1\n").unwrap();
        assert!(cfg.substrate.is_none());
        assert!(cfg.grid.is_none());
        assert!(!cfg.verbose);
        assert_eq!(cfg.solver, SolverConfig::default());
        assert_eq!(cfg.policy.selector, 1);
    }

    #[test]
    fn run_config_with_grid_and_solver() {
        let text = "scenarios: s.json\npolicy:\n  selector: 3\n  product_threshold: 0.05\ngrid:\n  widths: {start: 1.2, step: 0.1, count: 3}\nsolver:\n  time_limit_secs: 10.0\n  workers: 2\n";
        let cfg: RunConfig = serde_yaml::from_str(text).unwrap();
        let grid = cfg.grid.unwrap();
        assert_eq!(grid.widths.count, 3);
        assert_eq!(grid.heights, GridAxis::DEFAULT_HEIGHTS);
        assert_eq!(cfg.solver.workers, 2);
        assert!(cfg.policy.to_policy().is_ok());
    }

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn size_flags_parse() {
        let parsed = args(&["--config", "run.yaml", "--width", "1.5", "--height", "1.25"]).unwrap();
        assert_eq!(
            parsed,
            Args {
                config: Some("run.yaml".to_string()),
                width: Some(1.5),
                height: Some(1.25),
            }
        );
    }

    #[test]
    fn bad_size_flags_are_rejected() {
        let err = args(&["--config", "run.yaml", "--width", "1,5", "--height", "1.2"]).unwrap_err();
        assert!(err.to_string().contains("--width"));
        assert!(args(&["--config", "run.yaml", "--height"]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--widht", "1.5"]).is_err());
    }

    #[test]
    fn demo_scenarios_load_as_period_series() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/scenarios.json");
        let set = load_scenarios(&path, Some(5)).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.period_labels(), &[2025, 2026, 2027, 2028, 2029, 2030]);
        // Period 0 is the first entry of every series.
        assert_eq!(set.get(0).unwrap().price(0, 0), 42.0);
        assert!(set.iter().all(|s| s.depreciation.len() == set.horizon()));
    }

    #[test]
    fn demo_scenarios_need_depreciation_years() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/scenarios.json");
        assert!(load_scenarios(&path, None).is_err());
    }

    #[test]
    fn build_stamp_is_embedded() {
        assert!(!BUILD.git_sha.is_empty());
        assert!(!BUILD.build_date.is_empty());
        let json = serde_json::to_value(&BUILD).unwrap();
        assert_eq!(json["git_sha"], BUILD.git_sha);
    }
}
