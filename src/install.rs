//! Idempotent installation of the CryoTEN checkout, weights, and conda env.
//!
//! Each step is planned only when its artifact is missing, so rerunning the
//! installer after a partial failure resumes where it stopped.
use crate::command::SHELL;
use crate::error::{EnhanceError, MAX_ERROR_STDERR_BYTES};
use crate::invoke::{CommandSpec, ExternalInvoker};
use crate::paths::ToolPaths;
use crate::util::tail_string;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const REPOSITORY_URL: &str = "https://github.com/jianlin-cheng/cryoten";
pub const CHECKPOINT_URL: &str = "https://zenodo.org/records/12693785/files/cryoten.ckpt";

const ENV_CREATE_SCRIPT: &str = r#"source "$1" && conda env create -n "$2" -f "$3""#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub label: &'static str,
    pub spec: CommandSpec,
    /// Artifact written to a partial path and moved into place on success.
    pub staged: Option<StagedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub partial: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub tool: ToolPaths,
    pub steps: Vec<InstallStep>,
}

impl InstallPlan {
    /// True when every artifact exists and the marker is written.
    pub fn is_complete(&self) -> bool {
        self.steps.is_empty() && self.tool.marker_path().is_file()
    }
}

/// Inputs the planner needs from environment resolution.
#[derive(Debug, Clone)]
pub struct InstallTarget<'a> {
    pub tool: ToolPaths,
    pub conda_base: &'a Path,
    pub activation_script: &'a Path,
    pub conda_env: &'a str,
}

pub fn plan_install(target: &InstallTarget<'_>) -> Result<InstallPlan, EnhanceError> {
    plan_install_with(target, |program| which::which(program).ok())
}

fn plan_install_with(
    target: &InstallTarget<'_>,
    locate: impl Fn(&str) -> Option<PathBuf>,
) -> Result<InstallPlan, EnhanceError> {
    let require = |program: &str| {
        locate(program)
            .map(|path| path.display().to_string())
            .ok_or_else(|| EnhanceError::resolution(format!("{program} not found in PATH")))
    };
    let tool = &target.tool;
    let install_dir = tool.install_dir();
    let mut steps = Vec::new();

    if !install_dir.is_dir() {
        steps.push(InstallStep {
            label: "clone repository",
            spec: CommandSpec::new(require("git")?)
                .args(["clone", REPOSITORY_URL])
                .arg(install_dir.display().to_string()),
            staged: None,
        });
    }
    let checkpoint = tool.checkpoint_path();
    if !checkpoint.is_file() {
        let partial = tool.partial_checkpoint_path();
        steps.push(InstallStep {
            label: "download checkpoint",
            spec: CommandSpec::new(require("wget")?)
                .args(["-O".to_string(), partial.display().to_string()])
                .arg(CHECKPOINT_URL),
            staged: Some(StagedFile {
                partial,
                target: checkpoint,
            }),
        });
    }
    let env_dir = target.conda_base.join("envs").join(target.conda_env);
    if !env_dir.is_dir() {
        steps.push(InstallStep {
            label: "create conda environment",
            spec: CommandSpec::new(SHELL).args([
                "-c".to_string(),
                ENV_CREATE_SCRIPT.to_string(),
                "cryoten-install".to_string(),
                target.activation_script.display().to_string(),
                target.conda_env.to_string(),
                tool.environment_file().display().to_string(),
            ]),
            staged: None,
        });
    }

    Ok(InstallPlan {
        tool: tool.clone(),
        steps,
    })
}

/// Run planned steps in order, then write the install marker.
pub fn run_install(
    invoker: &dyn ExternalInvoker,
    plan: &InstallPlan,
) -> Result<PathBuf, EnhanceError> {
    let package_dir = plan.tool.package_dir();
    fs::create_dir_all(package_dir).map_err(|err| {
        EnhanceError::resolution(format!("create {}: {err}", package_dir.display()))
    })?;

    for step in &plan.steps {
        let line = step.spec.display_line();
        tracing::info!(step = step.label, command = %line, "install step");
        let result = invoker
            .run(&step.spec)
            .map_err(|err| EnhanceError::Invocation {
                command: line.clone(),
                status: "failed to start".to_string(),
                stderr: err.to_string(),
            })
            .and_then(|output| {
                if output.success() {
                    return Ok(());
                }
                Err(EnhanceError::Invocation {
                    command: line.clone(),
                    status: output.status_label(),
                    stderr: tail_string(output.stderr.trim(), MAX_ERROR_STDERR_BYTES),
                })
            });
        if let Err(err) = result {
            if let Some(staged) = &step.staged {
                discard_partial(&staged.partial);
            }
            return Err(err);
        }
        if let Some(staged) = &step.staged {
            publish_staged(staged)?;
        }
    }

    let marker = plan.tool.marker_path();
    fs::write(&marker, b"").map_err(|err| {
        EnhanceError::resolution(format!("write {}: {err}", marker.display()))
    })?;
    Ok(marker)
}

fn publish_staged(staged: &StagedFile) -> Result<(), EnhanceError> {
    if !staged.partial.is_file() {
        return Err(EnhanceError::OutputMissing(staged.partial.clone()));
    }
    fs::rename(&staged.partial, &staged.target).map_err(|err| {
        EnhanceError::resolution(format!(
            "move {} to {}: {err}",
            staged.partial.display(),
            staged.target.display()
        ))
    })
}

fn discard_partial(partial: &Path) {
    match fs::remove_file(partial) {
        Ok(()) => tracing::debug!(path = %partial.display(), "removed partial download"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %partial.display(), %err, "could not remove partial download")
        }
    }
}
