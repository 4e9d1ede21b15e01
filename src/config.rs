//! Step configuration.
//!
//! `EnvironmentSettings` holds what the user asked for (CLI flags over
//! environment over defaults); `StepConfig` is the resolved, validated form
//! handed to every later phase.
use serde::Serialize;
use std::path::PathBuf;

/// Conda environment the tool's installer creates.
pub const DEFAULT_CONDA_ENV: &str = "cryoten_env";
/// Tool release the install layout is keyed on.
pub const TOOL_VERSION: &str = "1.0.0";
/// Environment variable naming the platform base directory.
pub const PLATFORM_BASE_ENV: &str = "SCIPION_HOME";
/// Fallback platform base, relative to the user's home directory.
pub const DEFAULT_PLATFORM_DIR: &str = "scipion";
/// Variable exported to the child to pin a GPU.
pub const GPU_VISIBILITY_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Which GPU the tool may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "index")]
pub enum GpuSelection {
    /// Leave the inherited device visibility untouched.
    Inherit,
    /// Export the visibility variable set to this device index.
    Device(u32),
    /// Hide every device so the tool falls back to CPU.
    Disabled,
}

impl GpuSelection {
    pub fn from_flags(use_gpu: bool, index: Option<u32>) -> Self {
        match (use_gpu, index) {
            (false, _) => Self::Disabled,
            (true, Some(index)) => Self::Device(index),
            (true, None) => Self::Inherit,
        }
    }

    /// Value to export for the child, if any.
    pub fn visibility_value(&self) -> Option<String> {
        match self {
            Self::Inherit => None,
            Self::Device(index) => Some(index.to_string()),
            Self::Disabled => Some(String::new()),
        }
    }
}

/// Unresolved user inputs for environment discovery.
#[derive(Debug, Clone)]
pub struct EnvironmentSettings {
    pub conda: Option<PathBuf>,
    pub platform_base: Option<PathBuf>,
    pub conda_env: String,
    pub version: String,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            conda: None,
            platform_base: None,
            conda_env: DEFAULT_CONDA_ENV.to_string(),
            version: TOOL_VERSION.to_string(),
        }
    }
}

/// Everything the command builder needs, resolved once at step start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepConfig {
    pub activation_script: PathBuf,
    pub tool_dir: PathBuf,
    pub conda_env: String,
    pub gpu: GpuSelection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_flags_map_to_selection() {
        assert_eq!(GpuSelection::from_flags(true, Some(1)), GpuSelection::Device(1));
        assert_eq!(GpuSelection::from_flags(true, None), GpuSelection::Inherit);
        assert_eq!(GpuSelection::from_flags(false, Some(1)), GpuSelection::Disabled);
    }

    #[test]
    fn disabled_gpu_exports_empty_visibility() {
        assert_eq!(GpuSelection::Disabled.visibility_value(), Some(String::new()));
        assert_eq!(GpuSelection::Inherit.visibility_value(), None);
        assert_eq!(
            GpuSelection::Device(2).visibility_value(),
            Some("2".to_string())
        );
    }
}
