//! The run lifecycle controller: preflight, canonical run directories,
//! and one-way run-status transitions.
//!
//! The Run Controller is the sole owner of lifecycle transitions; every
//! other component (ingest, the pipeline, the bundle writer) acts on
//! paths and handles this module hands out, never minting its own run
//! directory or flipping `run_status.json` itself.

pub mod pipeline;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::available_space;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{AppError, FailureReason};
use crate::identity::mint_run_id;
use crate::model::SelectionScope;

/// Conservative free-disk floor checked at preflight.
const MIN_FREE_DISK_BYTES: u64 = 250 * 1024 * 1024;

/// The parent directory under which every run gets its own `<run_id>`
/// subtree, matching the evidence bundle's own path convention.
const RUNS_SUBDIR: &str = "downloads/voxelmask_runs";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    PreflightFailed,
    InProgress,
    Completed,
    Failed,
}

/// `run_status.json` at the run root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusFile {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// The canonical per-run directory layout:
/// `downloads/voxelmask_runs/<run_id>/{bundle,logs,receipts,tmp,viewer}/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub bundle: PathBuf,
    pub logs: PathBuf,
    pub receipts: PathBuf,
    pub tmp: PathBuf,
    pub viewer: PathBuf,
}

impl RunPaths {
    fn new(output_root: &Path, run_id: &str) -> Self {
        let root = output_root.join(RUNS_SUBDIR).join(run_id);
        RunPaths {
            bundle: root.join("bundle"),
            logs: root.join("logs"),
            receipts: root.join("receipts"),
            tmp: root.join("tmp"),
            viewer: root.join("viewer"),
            root,
        }
    }

    fn create_all(&self) -> Result<(), AppError> {
        for dir in [&self.bundle, &self.logs, &self.receipts, &self.tmp, &self.viewer] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Build-identity fields recorded in the bundle's `CONFIG/app_build.json`
/// and referenced by `RunContext::build_fingerprint`.
#[derive(Debug, Clone)]
pub struct BuildFingerprint {
    pub version: String,
    pub commit: String,
    pub config_hash: String,
}

impl BuildFingerprint {
    pub fn current(config_hash: String) -> Self {
        BuildFingerprint {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("VERGEN_GIT_SHA").unwrap_or("unknown").to_string(),
            config_hash,
        }
    }
}

/// Immutable identity for one run, fixed at `open_run` time.
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub paths: RunPaths,
    pub profile_name: String,
    pub selection_scope: SelectionScope,
    pub build_fingerprint: BuildFingerprint,
}

/// A handle to an opened run. Only the Run Controller transitions its
/// status; everything else treats this as read-only identity plus a set
/// of paths to write into.
pub struct RunHandle {
    pub context: RunContext,
    status: RunStatus,
}

impl RunHandle {
    pub fn status(&self) -> RunStatus {
        self.status
    }
}

/// Owns lifecycle transitions for runs rooted at `output_root`.
pub struct RunController {
    output_root: PathBuf,
}

impl RunController {
    pub fn new(output_root: PathBuf) -> Self {
        RunController { output_root }
    }

    /// Run every preflight check. On success, input may be read; on
    /// failure, `run_status.json` is written with `status=preflight_failed`
    /// and no input is ever touched.
    pub fn preflight(&self, config: &RunConfig) -> Result<(), AppError> {
        config.validate_profile().map_err(|_| {
            AppError::PreflightFailed(format!("unknown compliance profile '{}'", config.profile_name))
        })?;

        let runs_root = self.output_root.join(RUNS_SUBDIR);
        fs::create_dir_all(&runs_root)
            .map_err(|e| AppError::PreflightFailed(format!("output root not writable: {e}")))?;

        self.prune_stale_tmp_dirs(&runs_root);

        let available = available_space(&runs_root)
            .map_err(|e| AppError::PreflightFailed(format!("cannot read free disk space: {e}")))?;
        if available < MIN_FREE_DISK_BYTES {
            return Err(AppError::PreflightFailed(format!(
                "insufficient free disk space: {available} bytes available, {MIN_FREE_DISK_BYTES} required"
            )));
        }

        if !config.input_path.exists() {
            return Err(AppError::PreflightFailed(format!(
                "input path does not exist: {}",
                config.input_path.display()
            )));
        }

        if config.detection_options.required {
            // A real detector is injected by the caller; this crate only
            // ships `detection::NullAdapter`, which never satisfies
            // `required = true`. Treat "required but none configured" as
            // a preflight failure rather than discovering it mid-run.
            return Err(AppError::PreflightFailed(
                "detection dependency marked required but no detector is configured".to_string(),
            ));
        }

        Ok(())
    }

    /// Stale `tmp/` subtrees from a run that crashed before its final
    /// rename are harmless to a subsequent run (each run owns its own
    /// `<run_id>` subtree) but are pruned proactively.
    fn prune_stale_tmp_dirs(&self, runs_root: &Path) {
        let Ok(entries) = fs::read_dir(runs_root) else {
            return;
        };
        for entry in entries.flatten() {
            let tmp_dir = entry.path().join("tmp");
            let status_path = entry.path().join("run_status.json");
            let still_in_progress = fs::read_to_string(&status_path)
                .ok()
                .and_then(|s| serde_json::from_str::<RunStatusFile>(&s).ok())
                .map(|s| s.status == RunStatus::InProgress)
                .unwrap_or(false);
            if tmp_dir.exists() && !still_in_progress {
                if let Err(e) = fs::remove_dir_all(&tmp_dir) {
                    warn!(path = %tmp_dir.display(), error = %e, "failed to prune stale tmp directory");
                } else {
                    info!(path = %tmp_dir.display(), "pruned stale tmp directory from a prior run");
                }
            }
        }
    }

    /// Preflight must already have passed. Mints a collision-free run id,
    /// creates the canonical directory layout, and writes the initial
    /// `run_status.json` with `status=in_progress`.
    pub fn open_run(&self, config: &RunConfig, config_hash: String) -> Result<RunHandle, AppError> {
        let started_at = Utc::now();
        let mut run_id = mint_run_id(started_at);
        let mut paths = RunPaths::new(&self.output_root, &run_id);
        while paths.root.exists() {
            run_id = mint_run_id(started_at);
            paths = RunPaths::new(&self.output_root, &run_id);
        }
        paths.create_all()?;

        let context = RunContext {
            run_id: run_id.clone(),
            started_at,
            paths,
            profile_name: config.profile_name.clone(),
            selection_scope: config.selection_scope,
            build_fingerprint: BuildFingerprint::current(config_hash),
        };

        let handle = RunHandle {
            context,
            status: RunStatus::InProgress,
        };
        self.write_status(&handle)?;
        info!(run_id = %handle.context.run_id, "run opened");
        Ok(handle)
    }

    /// One-way: in_progress → completed.
    pub fn complete(&self, mut handle: RunHandle) -> Result<(), AppError> {
        handle.status = RunStatus::Completed;
        self.write_status_with(&handle, Some(Utc::now()), None, None)?;
        info!(run_id = %handle.context.run_id, "run completed");
        Ok(())
    }

    /// One-way: in_progress → failed. Never called after `complete`.
    pub fn fail(&self, mut handle: RunHandle, reason: FailureReason) -> Result<(), AppError> {
        handle.status = RunStatus::Failed;
        self.write_status_with(&handle, None, Some(Utc::now()), Some(reason.to_string()))?;
        warn!(run_id = %handle.context.run_id, reason = %reason, "run failed");
        Ok(())
    }

    /// Write `run_status.json` with `status=preflight_failed` at the
    /// output root, before any run directory exists.
    pub fn record_preflight_failure(&self, reason: &AppError) -> Result<(), AppError> {
        let runs_root = self.output_root.join(RUNS_SUBDIR);
        fs::create_dir_all(&runs_root)?;
        let file = RunStatusFile {
            run_id: String::new(),
            started_at: Utc::now(),
            status: RunStatus::PreflightFailed,
            completed_at: None,
            failed_at: Some(Utc::now()),
            failure_reason: Some(reason.to_string()),
        };
        fs::write(
            runs_root.join("run_status.json"),
            serde_json::to_vec_pretty(&file)?,
        )?;
        Ok(())
    }

    fn write_status(&self, handle: &RunHandle) -> Result<(), AppError> {
        self.write_status_with(handle, None, None, None)
    }

    fn write_status_with(
        &self,
        handle: &RunHandle,
        completed_at: Option<DateTime<Utc>>,
        failed_at: Option<DateTime<Utc>>,
        failure_reason: Option<String>,
    ) -> Result<(), AppError> {
        let file = RunStatusFile {
            run_id: handle.context.run_id.clone(),
            started_at: handle.context.started_at,
            status: handle.status,
            completed_at,
            failed_at,
            failure_reason,
        };
        fs::write(
            handle.context.paths.root.join("run_status.json"),
            serde_json::to_vec_pretty(&file)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ResearchContext;
    use crate::config::{DetectionOptions, Salt};

    fn config(output_root: PathBuf, input_path: PathBuf) -> RunConfig {
        RunConfig {
            input_path,
            output_root,
            profile_name: "internal_repair".to_string(),
            selection_scope: SelectionScope::default(),
            salt: Salt::mint(),
            research_context: ResearchContext::default(),
            detection_options: DetectionOptions::default(),
            audit_db_path: None,
        }
    }

    #[test]
    fn preflight_fails_on_unknown_profile_without_touching_input() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input");
        fs::create_dir_all(&input).unwrap();
        let mut cfg = config(tmp.path().to_path_buf(), input);
        cfg.profile_name = "not_a_real_profile".to_string();

        let controller = RunController::new(tmp.path().to_path_buf());
        let err = controller.preflight(&cfg).unwrap_err();
        assert!(matches!(err, AppError::PreflightFailed(_)));
    }

    #[test]
    fn preflight_fails_on_missing_input_path() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path().to_path_buf(), tmp.path().join("does-not-exist"));

        let controller = RunController::new(tmp.path().to_path_buf());
        assert!(controller.preflight(&cfg).is_err());
    }

    #[test]
    fn open_run_creates_the_canonical_directory_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input");
        fs::create_dir_all(&input).unwrap();
        let cfg = config(tmp.path().to_path_buf(), input);

        let controller = RunController::new(tmp.path().to_path_buf());
        controller.preflight(&cfg).unwrap();
        let handle = controller.open_run(&cfg, "cfg-hash".to_string()).unwrap();

        assert!(handle.context.paths.bundle.exists());
        assert!(handle.context.paths.logs.exists());
        assert!(handle.context.paths.tmp.exists());
        assert!(handle.context.paths.root.join("run_status.json").exists());
        assert_eq!(handle.status(), RunStatus::InProgress);
    }

    #[test]
    fn complete_and_fail_are_one_way_terminal_transitions() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input");
        fs::create_dir_all(&input).unwrap();
        let cfg = config(tmp.path().to_path_buf(), input);

        let controller = RunController::new(tmp.path().to_path_buf());
        controller.preflight(&cfg).unwrap();
        let handle = controller.open_run(&cfg, "cfg-hash".to_string()).unwrap();
        let root = handle.context.paths.root.clone();

        controller.complete(handle).unwrap();

        let status: RunStatusFile =
            serde_json::from_str(&fs::read_to_string(root.join("run_status.json")).unwrap())
                .unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert!(status.completed_at.is_some());
    }
}
