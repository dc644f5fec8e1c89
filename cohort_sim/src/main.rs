//! Cohort Simulator CLI
//!
//! Run built-in scenarios or JSON model bundles through the cohort engine.

use clap::Parser;
use cohort_core::DiscountKind;
use cohort_env::{DiscountTiming, OccupancyBasis};
use cohort_sim::scenarios::ScenarioId;
use cohort_sim::{ModelBundle, ResultExport, RunReport, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Cohort Markov model runner
#[derive(Parser, Debug)]
#[command(name = "cohort-sim")]
#[command(about = "Run deterministic cohort Markov models and check their invariants", long_about = None)]
struct Args {
    /// Scenario to run (alive_dead, progression, spinal_surgery, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Run a JSON model bundle instead of a built-in scenario
    #[arg(short, long)]
    bundle: Option<String>,

    /// Override discount timing (start, mid, end)
    #[arg(long)]
    timing: Option<DiscountTiming>,

    /// Override occupancy basis (start, end, half_cycle)
    #[arg(long)]
    basis: Option<OccupancyBasis>,

    /// Drop contributors with negligible totals from the breakdowns
    #[arg(long)]
    prune: bool,

    /// Tolerance used by --prune
    #[arg(long, default_value_t = cohort_core::DEFAULT_PRUNE_TOLERANCE)]
    prune_tolerance: f64,

    /// Run each model once instead of twice
    #[arg(long)]
    skip_determinism_check: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the full result of a single run to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn log_report(report: &RunReport) {
    if report.passed {
        info!("✓ {} PASSED ({} cycles)", report.scenario, report.n_cycles);
    } else {
        error!(
            "✗ {} FAILED: {}",
            report.scenario,
            report.failure_reason.as_deref().unwrap_or("unknown")
        );
        return;
    }

    let Some(result) = &report.result else {
        return;
    };
    for arm in &result.per_treatment {
        info!(
            "  {:<24} cost {:>14.2}  outcome {:>9.4}  (discounted)",
            arm.treatment,
            arm.total(DiscountKind::Discounted, cohort_core::Metric::Cost),
            arm.total(DiscountKind::Discounted, cohort_core::Metric::Outcome),
        );
    }
    for c in &result.icer.discounted.comparisons {
        match c.icer {
            Some(icer) => info!("  ICER {} vs {}: {:.2}", result.icer.discounted.reference, c.comparator, icer),
            None => info!("  ICER {} vs {}: undefined", result.icer.discounted.reference, c.comparator),
        }
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for --json
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Cohort Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut runner = ScenarioRunner::new();
    if let Some(timing) = args.timing {
        runner = runner.with_timing(timing);
    }
    if let Some(basis) = args.basis {
        runner = runner.with_basis(basis);
    }
    if args.prune {
        runner = runner.with_pruning(args.prune_tolerance);
    }
    if args.skip_determinism_check {
        runner = runner.with_determinism_check(false);
    }

    let reports: Vec<RunReport> = if let Some(path) = &args.bundle {
        let bundle = ModelBundle::from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: failed to load bundle '{}': {}", path, e);
            std::process::exit(1);
        });
        vec![runner.run_bundle(&bundle)]
    } else {
        let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
            ScenarioId::all()
        } else {
            vec![args.scenario.parse().unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: alive_dead, progression, spinal_surgery, all");
                std::process::exit(1);
            })]
        };
        scenarios.into_iter().map(|s| runner.run(s)).collect()
    };

    if let Some(export_path) = &args.export {
        if reports.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        if let Some(report) = reports.first() {
            match ResultExport::from_report(report).write_to_file(export_path) {
                Ok(()) => info!("Exported result to {}", export_path),
                Err(e) => error!("Failed to write export: {}", e),
            }
        }
    }

    let total = reports.len();
    let failed_count = reports.iter().filter(|r| !r.passed).count();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": reports.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario,
                    "passed": r.passed,
                    "n_cycles": r.n_cycles,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
        for report in &reports {
            log_report(report);
        }
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} runs passed!", total);
        } else {
            error!("❌ {}/{} runs failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
