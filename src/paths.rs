//! Typed paths into a project run directory and the tool install layout.
use std::path::{Path, PathBuf};

/// Extension the tool writes regardless of the input format.
pub const OUTPUT_EXTENSION: &str = "mrc";

/// Locations inside `<project>/Runs/<run-id>/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    project: PathBuf,
    run_id: String,
}

impl RunPaths {
    pub fn new(project: PathBuf, run_id: impl Into<String>) -> Self {
        Self {
            project,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Return the `Runs/<run-id>/` directory path.
    pub fn run_dir(&self) -> PathBuf {
        self.project.join("Runs").join(&self.run_id)
    }

    /// Return the `extra/` directory for step-produced artifacts.
    pub fn extra_dir(&self) -> PathBuf {
        self.run_dir().join("extra")
    }

    /// Return the `logs/` directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir().join("logs")
    }

    /// Return the run's object store path.
    pub fn outputs_path(&self) -> PathBuf {
        self.run_dir().join("outputs.json")
    }

    /// Resolve an input path as the host does: relative paths hang off the project.
    pub fn resolve_input(&self, input: &Path) -> PathBuf {
        if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.project.join(input)
        }
    }

    /// `extra/<stem>.mrc` for the given input, whatever its extension.
    pub fn output_for(&self, input: &Path) -> Option<PathBuf> {
        let stem = input.file_stem()?;
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(OUTPUT_EXTENSION);
        Some(self.extra_dir().join(name))
    }
}

/// Locations inside `<platform-base>/software/em/cryoten-<version>/`.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    package_dir: PathBuf,
}

impl ToolPaths {
    pub fn new(platform_base: &Path, version: &str) -> Self {
        Self {
            package_dir: platform_base
                .join("software")
                .join("em")
                .join(format!("cryoten-{version}")),
        }
    }

    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Return the cloned repository directory the tool runs from.
    pub fn install_dir(&self) -> PathBuf {
        self.package_dir.join("cryoten")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.install_dir().join("cryoten.ckpt")
    }

    /// Download target while the checkpoint transfer is in flight.
    pub fn partial_checkpoint_path(&self) -> PathBuf {
        self.install_dir().join("cryoten.ckpt.part")
    }

    pub fn environment_file(&self) -> PathBuf {
        self.install_dir().join("environment.yaml")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.package_dir.join("cryoten_installed")
    }
}
