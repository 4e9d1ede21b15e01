//! Environment and path discovery.
//!
//! Each lookup runs once per step; a failed lookup is terminal.
use crate::config::{
    EnvironmentSettings, GpuSelection, StepConfig, DEFAULT_PLATFORM_DIR, PLATFORM_BASE_ENV,
};
use crate::error::EnhanceError;
use crate::invoke::{CommandSpec, ExternalInvoker};
use crate::paths::ToolPaths;
use std::env;
use std::path::{Path, PathBuf};

/// Program the tool directory must contain.
pub const EVAL_PROGRAM: &str = "eval.py";

const ACTIVATION_SCRIPT: &str = "conda.sh";

/// Locate the conda executable: explicit path, then `CONDA_EXE`, then `PATH`.
pub fn locate_conda(explicit: Option<&Path>) -> Result<PathBuf, EnhanceError> {
    let from_env = env::var_os("CONDA_EXE")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    locate_conda_from(explicit, from_env, which::which("conda").ok())
}

fn locate_conda_from(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    from_path: Option<PathBuf>,
) -> Result<PathBuf, EnhanceError> {
    explicit
        .map(Path::to_path_buf)
        .or(from_env)
        .or(from_path)
        .ok_or_else(|| EnhanceError::resolution("conda not found (set CONDA_EXE or pass --conda)"))
}

/// Ask conda for its installation base directory.
pub fn conda_base(invoker: &dyn ExternalInvoker, conda: &Path) -> Result<PathBuf, EnhanceError> {
    let spec = CommandSpec::new(conda.display().to_string()).args(["info", "--base"]);
    let output = invoker.run(&spec).map_err(|err| {
        EnhanceError::resolution(format!("run {}: {err}", spec.display_line()))
    })?;
    if !output.success() {
        return Err(EnhanceError::resolution(format!(
            "failed to determine conda base path ({}): {}",
            output.status_label(),
            output.stderr.trim()
        )));
    }
    let base = output.stdout.trim();
    if base.is_empty() {
        return Err(EnhanceError::resolution(
            "failed to determine conda base path: empty output",
        ));
    }
    Ok(PathBuf::from(base))
}

/// Compute and check `<conda-base>/etc/profile.d/conda.sh`.
pub fn resolve_activation_script(
    invoker: &dyn ExternalInvoker,
    conda: &Path,
) -> Result<PathBuf, EnhanceError> {
    let base = conda_base(invoker, conda)?;
    existing_activation_script(&base)
}

pub fn existing_activation_script(conda_base: &Path) -> Result<PathBuf, EnhanceError> {
    let script = activation_script_for(conda_base);
    if !script.is_file() {
        return Err(EnhanceError::resolution(format!(
            "conda activation script not found at {}",
            script.display()
        )));
    }
    tracing::debug!(script = %script.display(), "resolved activation script");
    Ok(script)
}

pub fn activation_script_for(conda_base: &Path) -> PathBuf {
    conda_base
        .join("etc")
        .join("profile.d")
        .join(ACTIVATION_SCRIPT)
}

/// Platform base: explicit path, then `SCIPION_HOME`, then `~/scipion`.
pub fn platform_base(explicit: Option<&Path>) -> Result<PathBuf, EnhanceError> {
    let from_env = env::var_os(PLATFORM_BASE_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    platform_base_from(explicit, from_env, dirs::home_dir())
}

fn platform_base_from(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf, EnhanceError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Ok(path);
    }
    home.map(|home| home.join(DEFAULT_PLATFORM_DIR)).ok_or_else(|| {
        EnhanceError::resolution(format!(
            "cannot determine platform base (set {PLATFORM_BASE_ENV} or pass --scipion-home)"
        ))
    })
}

/// Tool checkout under the platform base; must exist and hold the eval program.
pub fn resolve_tool_install_dir(base: &Path, version: &str) -> Result<PathBuf, EnhanceError> {
    let dir = ToolPaths::new(base, version).install_dir();
    if !dir.is_dir() {
        return Err(EnhanceError::resolution(format!(
            "cryoten install directory not found at {} (run `cryoten install`)",
            dir.display()
        )));
    }
    if !dir.join(EVAL_PROGRAM).is_file() {
        return Err(EnhanceError::resolution(format!(
            "{EVAL_PROGRAM} missing from {}",
            dir.display()
        )));
    }
    Ok(dir)
}

/// Resolve every environment fact the step needs.
pub fn resolve_step_config(
    invoker: &dyn ExternalInvoker,
    settings: &EnvironmentSettings,
    gpu: GpuSelection,
) -> Result<StepConfig, EnhanceError> {
    let conda = locate_conda(settings.conda.as_deref())?;
    let activation_script = resolve_activation_script(invoker, &conda)?;
    let base = platform_base(settings.platform_base.as_deref())?;
    let tool_dir = resolve_tool_install_dir(&base, &settings.version)?;
    Ok(StepConfig {
        activation_script,
        tool_dir,
        conda_env: settings.conda_env.clone(),
        gpu,
    })
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;
