//! `hotloop run`: execute a sample program and report how OSR behaved.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use hotloop_engine::bytecode::{self, Sample};
use hotloop_engine::{OsrConfig, OsrRuntime, OsrStats, OsrUnit, Value};
use serde::Serialize;
use termcolor::ColorChoice;
use tracing::debug;

use crate::output::StyledOutput;

pub struct RunArgs {
    pub program: String,
    pub args: Vec<String>,
    pub config: Option<PathBuf>,
    pub options: Vec<String>,
    pub json: bool,
}

/// Outcome of one run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub program: String,
    pub arguments: Vec<i32>,
    pub result: Option<i32>,
    pub via_osr: bool,
    pub compiled_targets: Vec<i64>,
    pub stats: Option<OsrStats>,
    pub elapsed_ms: f64,
}

pub fn execute(args: RunArgs, color: ColorChoice) -> anyhow::Result<()> {
    let sample: Sample = args.program.parse()?;
    let config = load_config(args.config.as_deref(), &args.options)?;
    let arguments = parse_arguments(sample, &args.args)?;
    let report = run(sample, &arguments, config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, color);
    }
    Ok(())
}

/// Build the configuration from an optional file plus `name=value` overrides
pub fn load_config(path: Option<&Path>, overrides: &[String]) -> anyhow::Result<OsrConfig> {
    let mut config = match path {
        Some(path) => OsrConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OsrConfig::default(),
    };
    for assignment in overrides {
        config
            .apply_assignment(assignment)
            .with_context(|| format!("Invalid option override '{}'", assignment))?;
    }
    config.validate()?;
    debug!(?config, overrides = overrides.len(), "configuration loaded");
    Ok(config)
}

/// Parse the program's integer arguments; the samples need them positive
pub fn parse_arguments(sample: Sample, args: &[String]) -> anyhow::Result<Vec<i32>> {
    if args.len() != sample.arity() {
        bail!("{} expects {} argument(s), got {}", sample, sample.arity(), args.len());
    }
    args.iter()
        .map(|arg| -> anyhow::Result<i32> {
            let value: i32 = arg
                .replace('_', "")
                .parse()
                .with_context(|| format!("Argument '{}' is not an integer", arg))?;
            if value < 1 {
                bail!("Argument {} must be at least 1", value);
            }
            Ok(value)
        })
        .collect()
}

pub fn run(sample: Sample, arguments: &[i32], config: OsrConfig) -> anyhow::Result<RunReport> {
    let runtime = OsrRuntime::new(config)?;
    let (target, unit) = bytecode::load(&runtime, sample);
    let mut ctx = runtime.context();
    debug!(program = sample.name(), ?arguments, "running sample");

    let start = Instant::now();
    let values = arguments.iter().copied().map(Value::Int).collect();
    let result = target
        .call(&mut ctx, values)
        .with_context(|| format!("{} failed", sample))?;
    let elapsed = start.elapsed();

    let metadata = unit.osr_slot().osr_metadata();
    let stats = metadata.map(|m| m.stats());
    let mut compiled_targets: Vec<i64> = metadata
        .map(|m| m.compilations().into_iter().map(|(key, _)| key).collect())
        .unwrap_or_default();
    compiled_targets.sort_unstable();

    Ok(RunReport {
        program: sample.name().to_string(),
        arguments: arguments.to_vec(),
        result: result.as_int(),
        via_osr: stats.as_ref().is_some_and(|s| s.osr_entries > 0),
        compiled_targets,
        stats,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
    })
}

fn print_report(report: &RunReport, color: ColorChoice) {
    let mut out = StyledOutput::new(color);
    let args: Vec<String> = report.arguments.iter().map(i32::to_string).collect();

    out.field("Program", &format!("{}({})", report.program, args.join(", ")));
    match report.result {
        Some(result) => out.field("Result", &result.to_string()),
        None => out.field("Result", "(not an integer)"),
    }

    out.bold(&format!("{:<16}", "Tier:"));
    if report.via_osr {
        out.success("OSR");
    } else {
        out.warning("interpreter");
    }
    out.newline();

    if !report.compiled_targets.is_empty() {
        let targets: Vec<String> = report.compiled_targets.iter().map(i64::to_string).collect();
        out.field("OSR targets", &targets.join(", "));
    }
    if let Some(stats) = &report.stats {
        out.field("Compilations", &stats.compilations.to_string());
        out.field("Bailouts", &stats.bailouts.to_string());
        out.field("OSR entries", &stats.osr_entries.to_string());
        out.field("Deopts", &stats.deoptimizations.to_string());
        out.field("Tag mismatches", &stats.tag_mismatches.to_string());
        if stats.disabled {
            out.warning("OSR disabled for this program");
            out.newline();
        }
    }
    out.info(&format!("Finished in {:.2}ms", report.elapsed_ms));
    out.newline();
    out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let config = load_config(
            None,
            &strings(&["osr-compilation-threshold=500", "osr-compilation-threshold=2_000", "osr=false"]),
        )
        .unwrap();
        assert_eq!(config.compilation_threshold, 2000);
        assert!(!config.enabled);
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let err = load_config(None, &strings(&["osr-frobnicate=1"])).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown option: osr-frobnicate"));
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let err = load_config(None, &strings(&["osr-poll-interval=0"])).unwrap_err();
        assert!(err.to_string().contains("osr-poll-interval must be positive"));
    }

    #[test]
    fn test_argument_arity_and_range() {
        assert_eq!(parse_arguments(Sample::Multiply, &strings(&["3", "1_000"])).unwrap(), vec![3, 1000]);
        assert!(parse_arguments(Sample::Triple, &strings(&["1", "2"])).is_err());
        assert!(parse_arguments(Sample::Triple, &strings(&["0"])).is_err());
        assert!(parse_arguments(Sample::Triple, &strings(&["x"])).is_err());
    }

    #[test]
    fn test_run_reports_osr() {
        let config = load_config(
            None,
            &strings(&["osr-compilation-threshold=100", "osr-poll-interval=10", "background-compilation=false"]),
        )
        .unwrap();
        let report = run(Sample::Triple, &[1000], config).unwrap();
        assert_eq!(report.result, Some(3000));
        assert!(report.via_osr);
        assert_eq!(report.compiled_targets, vec![0]);
        assert_eq!(report.stats.unwrap().compilations, 1);
    }

    #[test]
    fn test_run_without_osr() {
        let report = run(Sample::Multiply, &[6, 7], OsrConfig::default()).unwrap();
        assert_eq!(report.result, Some(42));
        assert!(!report.via_osr);
        assert!(report.stats.is_none());
    }
}
