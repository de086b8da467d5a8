#![forbid(unsafe_code)]

mod checks;

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatekeeper_core::errors::{CheckIssue, CheckReport, EngineError};
use gatekeeper_core::record::{ExecutionRecord, GateResult};
use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_core::traits::RunContext;
use gatekeeper_core::types::{OverallStatus, ValidationStatus};
use gatekeeper_engine::{check, compliance, store, GateCatalog, Orchestrator};

/// Exit code for unusable configuration or I/O errors.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(
    name = "gk",
    version,
    about = "Quality gate orchestration: tiered gates, abort rules, compliance flags."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate a pipeline document: gates, criteria, ordering, compliance, handlers.
    Check {
        /// Path to pipeline .json file.
        file: String,

        /// Output structured JSON report.
        #[arg(long)]
        json: bool,

        /// Fail on warnings (not just errors).
        #[arg(long)]
        strict: bool,
    },

    /// Print the resolved execution order per tier.
    Plan {
        /// Path to pipeline .json file.
        file: String,

        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline's gates and report the execution record.
    Run {
        /// Path to pipeline .json file.
        file: String,

        /// Context entries as key=value (value parsed as JSON when possible).
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Run only this gate; no abort rule applies.
        #[arg(long)]
        gate: Option<String>,

        /// Write the execution record to this path.
        #[arg(long)]
        out: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Recompute compliance flags from a saved execution record.
    Flags {
        /// Path to a saved execution record.
        record: String,

        /// Path to the pipeline .json file declaring the requirements.
        file: String,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let outcome = match cli.cmd {
        Cmd::Check { file, json, strict } => cmd_check(&file, json, strict),

        Cmd::Plan { file, json } => cmd_plan(&file, json),

        Cmd::Run {
            file,
            context,
            gate,
            out,
            json,
        } => cmd_run(&file, &context, gate.as_deref(), out.as_deref(), json),

        Cmd::Flags { record, file, json } => cmd_flags(&record, &file, json),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn read_json(file: &str) -> Result<Value> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {file}"))?;
    serde_json::from_str(&content).with_context(|| format!("{file}: invalid JSON"))
}

fn cmd_check(file: &str, json_out: bool, strict: bool) -> Result<u8> {
    let data = read_json(file)?;
    let report = match serde_json::from_value::<PipelineConfig>(data.clone()) {
        Ok(config) => {
            // Malformed entries still count as declared so they are not
            // reported a second time as unresolvable validations.
            let names: Vec<&str> = config.checks.keys().map(String::as_str).collect();
            let mut report = check::check(&config, file, strict, Some(names.as_slice()));
            let (_, invalid) = checks::load_checks(&config);
            for (name, e) in invalid {
                report.errors.push(CheckIssue {
                    code: "E012".to_string(),
                    check: "handlers".to_string(),
                    message: format!("invalid command check '{name}': {e}"),
                    path: Some(format!("$.checks.{name}")),
                });
                report.pass = false;
            }
            report
        }
        Err(_) => check::check_value(&data, file, strict),
    };

    if json_out {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_check(&report);
    }
    Ok(if report.pass { 0 } else { 1 })
}

fn print_check(report: &CheckReport) {
    if report.pass {
        eprintln!("  ok  {}", report.file);
    } else {
        eprintln!("  FAIL {}", report.file);
    }
    for e in &report.errors {
        eprintln!(
            "  error {}: {} {}",
            e.code,
            e.message,
            e.path.as_deref().unwrap_or("")
        );
    }
    for w in &report.warnings {
        eprintln!(
            "  warn  {}: {} {}",
            w.code,
            w.message,
            w.path.as_deref().unwrap_or("")
        );
    }
}

fn cmd_plan(file: &str, json_out: bool) -> Result<u8> {
    let config = PipelineConfig::load(file)?;
    let catalog = GateCatalog::from_config(&config)
        .with_context(|| format!("{file}: invalid pipeline"))?;
    let plan = catalog.plan();

    if json_out {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        for tier in &plan {
            println!("{}:", tier.priority);
            for (i, id) in tier.gates.iter().enumerate() {
                let gate = catalog.require(id)?;
                let blocking = if gate.blocking { " [blocking]" } else { "" };
                println!("  {}. {}{blocking}", i + 1, gate.display_name());
            }
        }
    }
    Ok(0)
}

fn parse_context(entries: &[String]) -> Result<RunContext> {
    let mut ctx = RunContext::new();
    for entry in entries {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("invalid --context '{entry}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid --context '{entry}': empty key");
        }
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        ctx.insert(key, value);
    }
    Ok(ctx)
}

fn cmd_run(
    file: &str,
    context: &[String],
    gate: Option<&str>,
    out: Option<&str>,
    json_out: bool,
) -> Result<u8> {
    let config = PipelineConfig::load(file)?;
    let registry = checks::registry_from_config(&config)?;
    let orchestrator = Orchestrator::from_config(&config, registry)
        .with_context(|| format!("{file}: invalid pipeline"))?;
    let ctx = parse_context(context)?;

    if let Some(gate_id) = gate {
        let result = orchestrator.execute_gate(gate_id, &ctx)?;
        if json_out {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_gate(&result);
        }
        return Ok(if result.passed() { 0 } else { 1 });
    }

    let (record, code) = match orchestrator.execute_all_gates(ctx) {
        Ok(record) => {
            let code = record.overall_status.exit_code();
            (record, code)
        }
        Err(err) => {
            let code = err.exit_code();
            match err {
                EngineError::Abort(abort) => (abort.record, code),
                EngineError::Config(e) => {
                    return Err(e).with_context(|| format!("{file}: invalid pipeline"))
                }
            }
        }
    };

    if let Some(path) = out {
        store::save_record(path, &record)?;
    }
    if json_out {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    if record.overall_status == OverallStatus::PassedWithWarnings {
        let failed: Vec<&str> = record
            .gate_results
            .iter()
            .filter(|r| !r.passed())
            .map(|r| r.gate_id.as_str())
            .collect();
        eprintln!("warning: non-blocking gates failed: {}", failed.join(", "));
    }
    Ok(u8::try_from(code).unwrap_or(1))
}

fn print_gate(result: &GateResult) {
    let mark = if result.passed() { "ok  " } else { "FAIL" };
    eprintln!(
        "  {mark} {} [{}] {}/{} ({:.0}%)",
        result.gate_id, result.priority, result.passed_count, result.total_count, result.pass_rate
    );
    for outcome in &result.validation_outcomes {
        match outcome.status {
            ValidationStatus::Passed => {}
            ValidationStatus::Failed => eprintln!(
                "        fail  {}: {}",
                outcome.name,
                outcome.reason.as_deref().unwrap_or("")
            ),
            ValidationStatus::Error => eprintln!(
                "        error {}: {}",
                outcome.name,
                outcome.error_message.as_deref().unwrap_or("")
            ),
        }
    }
}

fn print_record(record: &ExecutionRecord) {
    for result in &record.gate_results {
        print_gate(result);
    }
    let summary = record.summary();
    eprintln!(
        "  {} gates run, {} passed, {} failed ({}/{} validations passed)",
        summary.gates_run,
        summary.gates_passed,
        summary.gates_failed,
        summary.validations_passed,
        summary.validations_run
    );
    match &record.abort_error {
        Some(message) => eprintln!("  ABORTED: {message}"),
        None => eprintln!("  status: {}", record.overall_status),
    }
    for (flag, ok) in &record.compliance_flags {
        eprintln!("  {} {flag}", if *ok { "yes" } else { "no " });
    }
}

fn cmd_flags(record_path: &str, file: &str, json_out: bool) -> Result<u8> {
    let record = store::load_record(record_path)?;
    let config = PipelineConfig::load(file)?;
    let catalog = GateCatalog::from_config(&config)
        .with_context(|| format!("{file}: invalid pipeline"))?;
    let requirements = config.compliance_requirements();
    compliance::validate_requirements(&requirements, &catalog)
        .with_context(|| format!("{file}: invalid compliance requirements"))?;

    let flags = compliance::aggregate(&record, &requirements);
    if json_out {
        println!("{}", serde_json::to_string_pretty(&flags)?);
    } else {
        for (flag, ok) in &flags {
            println!("{flag}: {ok}");
        }
    }
    Ok(0)
}
