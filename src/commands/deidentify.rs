//! `deidentify run`: the single end-to-end invocation of the core
//! pipeline from the command line.
//!
//! This is the one place in the crate that is allowed to call
//! `println!`/`eprintln!` directly — everywhere else goes through
//! `tracing`; human-facing summary output lives at the command boundary,
//! not in library code.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde::Serialize;

use voxelmask::compliance::ResearchContext;
use voxelmask::config::{DetectionOptions, RunConfig, Salt};
use voxelmask::detection::NullAdapter;
use voxelmask::model::SelectionScope;
use voxelmask::review::Session;
use voxelmask::run::pipeline::{self, PipelineInput, PipelineOutcome};
use voxelmask::run::RunController;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a single file, a directory tree, or a zip archive of
    /// source medical-image objects.
    pub input_path: PathBuf,

    /// Output root under which `downloads/voxelmask_runs/<run_id>/` is
    /// created.
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Named compliance profile to apply (see `deidentify profiles`).
    #[arg(long, default_value = "internal_repair")]
    pub profile: String,

    /// File containing the de-identification salt as raw bytes. When
    /// absent, `ANONYMIZATION_SALT` is consulted, and failing that a
    /// fresh per-run salt is minted (never logged, never stored).
    #[arg(long)]
    pub salt_file: Option<PathBuf>,

    /// Write a PHI-sterile JSON summary of the run to this path, in
    /// addition to the evidence bundle's own `QA/verification_report.json`.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Admit document-category objects (secondary capture, structured
    /// reports, encapsulated PDFs) into the run. Off by default: a run
    /// admits images unless excluded but must opt in to documents.
    #[arg(long)]
    pub include_documents: bool,

    /// Exclude image-category objects from the run.
    #[arg(long)]
    pub exclude_images: bool,

    /// Optional research-study context recorded for reporting only; it
    /// never gates a compliance decision by itself.
    #[arg(long)]
    pub trial_id: Option<String>,
    #[arg(long)]
    pub site_id: Option<String>,
    #[arg(long)]
    pub subject_id: Option<String>,
}

#[derive(Serialize)]
struct RunReport {
    bundle_id: String,
    bundle_path: String,
    exported: usize,
    skipped_unsupported: usize,
    excluded_by_scope: usize,
    failed: usize,
}

/// Run one invocation end to end and return the process exit code
/// (0 success, 2 preflight failure, 3 partial, 4 fatal, 5 cancelled).
/// Errors that prevent even attempting a disposition (a
/// malformed CLI invocation, an unreadable salt file) are returned as
/// `Err` and surface as a generic failure from `main`.
pub fn run(args: RunArgs) -> Result<i32> {
    let selection_scope = SelectionScope {
        include_images: !args.exclude_images,
        include_documents: args.include_documents,
    };

    let salt = match &args.salt_file {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read salt file {}", path.display()))?;
            Salt::from_bytes(bytes)
        }
        None => RunConfig::resolve_salt(),
    };

    let config_hash = voxelmask::identity::hash_bytes(
        format!(
            "{}:{}:{}",
            args.profile, selection_scope.include_images, selection_scope.include_documents
        )
        .as_bytes(),
    );

    let config = RunConfig {
        input_path: args.input_path.clone(),
        output_root: args.output.clone(),
        profile_name: args.profile.clone(),
        selection_scope,
        salt,
        research_context: ResearchContext {
            trial_id: args.trial_id.clone(),
            site_id: args.site_id.clone(),
            subject_id: args.subject_id.clone(),
        },
        detection_options: DetectionOptions::default(),
        audit_db_path: RunConfig::resolve_audit_db_path(),
    };

    let controller = RunController::new(args.output.clone());

    if let Err(preflight_err) = controller.preflight(&config) {
        controller.record_preflight_failure(&preflight_err)?;
        eprintln!(
            "{} {preflight_err}",
            style("preflight failed:").red().bold()
        );
        return Ok(preflight_err.exit_code());
    }

    let handle = controller.open_run(&config, config_hash)?;

    // No interactive front-end ships in this crate: the headless CLI
    // path starts a Review Session in manual mode and immediately seals
    // it with no regions, so a profile that authorises masking still
    // passes through the review gate rather than bypassing it — it
    // simply has nothing accepted to mask. An embedding application that
    // wants operator-driven masking drives `review::Session` itself and
    // calls `run::pipeline::run` directly instead of this CLI entry point.
    let mut session = Session::new();
    session
        .start(false, true)
        .context("failed to start the headless review session")?;
    session
        .accept()
        .context("failed to seal the headless review session")?;

    let input = PipelineInput {
        detector: &NullAdapter,
        review_session: Some(&session),
        regions_by_sop_uid: Default::default(),
        cancellation: Arc::new(AtomicBool::new(false)),
    };

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner} {msg}")
            .expect("static template parses")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message("de-identifying…");

    let result = pipeline::run(&controller, handle, &config, input);
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => {
            print_summary(&outcome);
            if let Some(report_path) = &args.report {
                write_report(report_path, &outcome)?;
            }
            let partial = outcome.failed > 0 || outcome.skipped_unsupported > 0;
            Ok(if partial { 3 } else { 0 })
        }
        Err(e) => {
            eprintln!("{} {e}", style("run failed:").red().bold());
            Ok(e.exit_code())
        }
    }
}

fn print_summary(outcome: &PipelineOutcome) {
    println!("{}", style("De-identification run complete.").green().bold());
    println!(
        "  {} {}",
        style("bundle:").dim(),
        outcome.bundle_path.display()
    );
    println!("  {} {}", style("exported:").dim(), outcome.exported);
    if outcome.skipped_unsupported > 0 {
        println!(
            "  {} {}",
            style("skipped (unsupported):").dim(),
            outcome.skipped_unsupported
        );
    }
    if outcome.excluded_by_scope > 0 {
        println!(
            "  {} {}",
            style("excluded (scope):").dim(),
            outcome.excluded_by_scope
        );
    }
    if outcome.failed > 0 {
        println!("  {} {}", style("failed:").yellow(), outcome.failed);
    }
}

fn write_report(path: &PathBuf, outcome: &PipelineOutcome) -> Result<()> {
    let report = RunReport {
        bundle_id: outcome
            .bundle_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        bundle_path: outcome.bundle_path.display().to_string(),
        exported: outcome.exported,
        skipped_unsupported: outcome.skipped_unsupported,
        excluded_by_scope: outcome.excluded_by_scope,
        failed: outcome.failed,
    };
    let bytes = serde_json::to_vec_pretty(&report)?;
    fs::write(path, bytes).with_context(|| format!("failed to write report to {}", path.display()))
}
