//! Shared test infrastructure for integration tests.
//!
//! Builds a throwaway project, conda install, and CryoTEN checkout whose
//! `conda` and `python` are small shell scripts, so the real binary can run
//! end to end without the deep-learning stack.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const RUN_ID: &str = "run001";
pub const INPUT_REL: &str = "Runs/000002_ProtImportVolumes/extra/map.mrc";
const TOOL_DIR_REL: &str = "software/em/cryoten-1.0.0/cryoten";

const FAKE_CONDA_SH: &str = "conda() { return 0; }\n";

// Runs as `python eval.py <input> <output>` from the tool directory.
const FAKE_PYTHON: &str = r#"#!/bin/sh
touch "$FIXTURE_ROOT/python_invoked"
[ -f eval.py ] || { echo "not in tool dir" >&2; exit 9; }
echo "gpu=${CUDA_VISIBLE_DEVICES-unset}"
if [ -n "$FAKE_TOOL_FAIL" ]; then
  echo "RuntimeError: CUDA out of memory" >&2
  exit 1
fi
if [ -n "$FAKE_TOOL_SKIP_OUTPUT" ]; then
  exit 0
fi
cp "$2" "$3"
"#;

pub struct Fixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub project: PathBuf,
    pub scipion: PathBuf,
    pub conda: PathBuf,
    pub conda_base: PathBuf,
    bin_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().canonicalize().expect("canonical temp dir");
        let bin_dir = root.join("bin");
        let conda_base = root.join("miniconda");
        let scipion = root.join("scipion");
        let project = root.join("project");

        write_file(&conda_base.join("etc/profile.d/conda.sh"), FAKE_CONDA_SH);
        write_file(
            &scipion.join(TOOL_DIR_REL).join("eval.py"),
            "# evaluated by the fake interpreter\n",
        );
        write_file(&project.join(INPUT_REL), mrc_header(100, 150.0));

        let conda = bin_dir.join("conda");
        write_script(
            &conda,
            &format!("#!/bin/sh\necho \"{}\"\n", conda_base.display()),
        );
        write_script(&bin_dir.join("python"), FAKE_PYTHON);

        Self {
            _temp: temp,
            root,
            project,
            scipion,
            conda,
            conda_base,
            bin_dir,
        }
    }

    /// Replace the fake conda with one that cannot report its base.
    pub fn break_conda(&self) {
        write_script(
            &self.conda,
            "#!/bin/sh\necho 'CondaError: corrupted install' >&2\nexit 1\n",
        );
    }

    /// Lay down the checkpoint and conda env so no install step is pending.
    pub fn provision_install(&self) {
        write_file(&self.tool_dir().join("cryoten.ckpt"), "weights");
        fs::create_dir_all(self.conda_base.join("envs/cryoten_env")).expect("create env dir");
    }

    pub fn tool_dir(&self) -> PathBuf {
        self.scipion.join(TOOL_DIR_REL)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.project.join("Runs").join(RUN_ID)
    }

    pub fn python_invoked(&self) -> bool {
        self.root.join("python_invoked").exists()
    }

    pub fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_cryoten"));
        let path = match env::var_os("PATH") {
            Some(existing) => {
                let mut paths = vec![self.bin_dir.clone()];
                paths.extend(env::split_paths(&existing));
                env::join_paths(paths).expect("join PATH")
            }
            None => self.bin_dir.clone().into_os_string(),
        };
        command
            .arg(subcommand)
            .env("PATH", path)
            .env("FIXTURE_ROOT", &self.root)
            .env("CRYOTEN_LOG", "warn")
            .env_remove("CONDA_EXE")
            .env_remove("CUDA_VISIBLE_DEVICES")
            .env_remove("FAKE_TOOL_FAIL")
            .env_remove("FAKE_TOOL_SKIP_OUTPUT");
        command
    }

    /// `cryoten enhance` wired to this fixture's project, conda, and install.
    pub fn enhance(&self) -> Command {
        let mut command = self.command("enhance");
        command
            .arg("--project")
            .arg(&self.project)
            .arg("--run")
            .arg(RUN_ID)
            .arg("--input")
            .arg(INPUT_REL)
            .arg("--conda")
            .arg(&self.conda)
            .arg("--scipion-home")
            .arg(&self.scipion);
        command
    }
}

pub fn bash_available() -> bool {
    which::which("bash").is_ok()
}

pub fn run(command: &mut Command) -> Output {
    command.output().expect("run cryoten")
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("parse stdout JSON")
}

fn write_file(path: &Path, contents: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents).expect("write file");
}

fn write_script(path: &Path, contents: &str) {
    write_file(path, contents);
    let mut permissions = fs::metadata(path).expect("stat script").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("chmod script");
}

/// Little-endian MRC2014 header with `mx` samples over `cella_x` Å.
fn mrc_header(mx: i32, cella_x: f32) -> Vec<u8> {
    let mut header = vec![0u8; 1024];
    header[28..32].copy_from_slice(&mx.to_le_bytes());
    header[40..44].copy_from_slice(&cella_x.to_le_bytes());
    header[208..212].copy_from_slice(b"MAP ");
    header[212..214].copy_from_slice(&[0x44, 0x44]);
    header
}
