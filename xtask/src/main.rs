use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "halo-gc workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the criterion benches and summarize them
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// Run a single bench target instead of all of them
        #[arg(long)]
        only: Option<String>,
    },
    /// Run the loom model tests
    Loom,
}

const BENCHES: &[&str] = &["alloc_benchmark", "sync_benchmark", "gc_work_benchmark"];

#[derive(Debug, Serialize)]
struct BenchResult {
    mean_ns: f64,
    ops_per_sec: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench { quick, report_only, only } => {
            if !report_only {
                let targets: Vec<&str> = match only.as_deref() {
                    Some(name) if BENCHES.contains(&name) => vec![name],
                    Some(name) => anyhow::bail!("unknown bench `{name}`; expected one of {BENCHES:?}"),
                    None => BENCHES.to_vec(),
                };
                run_benchmarks(&targets, quick)?;
            }
            generate_report()?;
        }
        Commands::Loom => run_loom()?,
    }

    Ok(())
}

fn run_benchmarks(targets: &[&str], quick: bool) -> Result<()> {
    for bench in targets {
        println!("\n>>> Running bench: {}", bench);
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0");
        cmd.args(["bench", "-p", "halo-gc", "--bench", bench]);

        // Args for the test runner (Criterion) go after --
        cmd.arg("--");
        if quick {
            cmd.arg("--measurement-time").arg("0.1");
            cmd.arg("--noplot");
            cmd.arg("--sample-size").arg("10");
        }

        let status = cmd.status().with_context(|| format!("Failed to run bench {}", bench))?;
        if !status.success() {
            eprintln!("Warning: bench {} failed", bench);
        } else {
            println!("Finished {} in {:.2?}", bench, start.elapsed());
        }
    }
    Ok(())
}

fn run_loom() -> Result<()> {
    let status = Command::new("cargo")
        .env("RUSTFLAGS", "--cfg loom")
        .args(["test", "-p", "halo-gc", "--release", "--test", "loom_lfstack"])
        .status()
        .context("Failed to run loom tests")?;
    if !status.success() {
        anyhow::bail!("loom tests failed");
    }
    Ok(())
}

fn generate_report() -> Result<()> {
    println!("\n>>> Generating Report...");
    let mut results: BTreeMap<String, BenchResult> = BTreeMap::new();

    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    collect_results(criterion_dir, criterion_dir, &mut results)?;

    let report_dir = Path::new("benchmark_results");
    fs::create_dir_all(report_dir)?;

    use std::io::Write;
    let report_path = report_dir.join("report.md");
    let mut file = fs::File::create(&report_path)?;
    writeln!(file, "# Benchmark Report")?;
    writeln!(file)?;
    writeln!(file, "| Benchmark | Mean | Ops/s |")?;
    writeln!(file, "|---|---|---|")?;
    for (name, result) in &results {
        writeln!(file, "| {} | {} | {} |", name, format_time(result.mean_ns), format_ops(result.ops_per_sec))?;
    }

    let json_path = report_dir.join("report.json");
    fs::write(&json_path, serde_json::to_string_pretty(&results)?)?;

    println!("Report written to {} and {}", report_path.display(), json_path.display());
    Ok(())
}

fn format_time(ns: f64) -> String {
    if ns > 1_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else if ns > 1_000.0 {
        format!("{:.2} us", ns / 1_000.0)
    } else {
        format!("{:.0} ns", ns)
    }
}

fn format_ops(ops: f64) -> String {
    if ops > 1_000_000.0 {
        format!("{:.2}M", ops / 1_000_000.0)
    } else if ops > 1_000.0 {
        format!("{:.2}K", ops / 1_000.0)
    } else {
        format!("{:.0}", ops)
    }
}

/// Criterion lays results out as `<group>/<function>/new/estimates.json`.
fn collect_results(root: &Path, dir: &Path, results: &mut BTreeMap<String, BenchResult>) -> Result<()> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(());
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|s| s.to_str()) == Some("report") {
                continue;
            }
            collect_results(root, &path, results)?;
            continue;
        }
        if path.file_name().and_then(|s| s.to_str()) != Some("estimates.json") {
            continue;
        }
        let Some(baseline_dir) = path.parent() else { continue };
        if baseline_dir.file_name().and_then(|s| s.to_str()) != Some("new") {
            continue;
        }
        let Some(bench_dir) = baseline_dir.parent() else { continue };
        let name = bench_dir
            .strip_prefix(root)
            .unwrap_or(bench_dir)
            .to_string_lossy()
            .replace('\\', "/");

        let content = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        let mean_ns = json
            .get("mean")
            .and_then(|m| m.get("point_estimate"))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        if mean_ns > 0.0 {
            results.insert(name, BenchResult { mean_ns, ops_per_sec: 1e9 / mean_ns });
        }
    }
    Ok(())
}
