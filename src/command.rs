//! Tool command construction.
//!
//! The shell script is a fixed string that only reads positional parameters;
//! paths and the env name travel as separate argv entries and are never
//! spliced into shell text.
use crate::config::{StepConfig, GPU_VISIBILITY_ENV};
use crate::invoke::CommandSpec;
use crate::resolve::EVAL_PROGRAM;
use std::path::{Path, PathBuf};

pub const SHELL: &str = "bash";
pub const INTERPRETER: &str = "python";

/// `$0` for the inline script, shown in process listings.
const SCRIPT_NAME: &str = "cryoten";

/// Source activation ($1), activate env ($2), enter tool dir ($3), evaluate $4 -> $5.
const RUN_SCRIPT: &str =
    r#"source "$1" && conda activate "$2" && cd "$3" && exec python eval.py "$4" "$5""#;

/// The built invocation plus the paths it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceCommand {
    pub spec: CommandSpec,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Build the tool invocation for one input/output pair.
pub fn build_enhance_command(config: &StepConfig, input: &Path, output: &Path) -> EnhanceCommand {
    let mut spec = CommandSpec::new(SHELL).args([
        "-c".to_string(),
        RUN_SCRIPT.to_string(),
        SCRIPT_NAME.to_string(),
        config.activation_script.display().to_string(),
        config.conda_env.clone(),
        config.tool_dir.display().to_string(),
        input.display().to_string(),
        output.display().to_string(),
    ]);
    if let Some(value) = config.gpu.visibility_value() {
        spec = spec.env(GPU_VISIBILITY_ENV, value);
    }
    EnhanceCommand {
        spec,
        input: input.to_path_buf(),
        output: output.to_path_buf(),
    }
}

/// Human-readable form of the script with its arguments substituted, for logs.
pub fn describe(command: &EnhanceCommand, config: &StepConfig) -> String {
    let quote = |path: &Path| shell_words::quote(&path.display().to_string()).into_owned();
    let mut parts = Vec::new();
    parts.push(format!("source {}", quote(&config.activation_script)));
    parts.push(format!(
        "conda activate {}",
        shell_words::quote(&config.conda_env)
    ));
    if let Some(value) = config.gpu.visibility_value() {
        parts.push(format!(
            "export {GPU_VISIBILITY_ENV}={}",
            shell_words::quote(&value)
        ));
    }
    parts.push(format!("cd {}", quote(&config.tool_dir)));
    parts.push(format!(
        "{INTERPRETER} {EVAL_PROGRAM} {} {}",
        quote(&command.input),
        quote(&command.output)
    ));
    parts.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuSelection;

    fn config(gpu: GpuSelection) -> StepConfig {
        StepConfig {
            activation_script: PathBuf::from("/opt/conda/etc/profile.d/conda.sh"),
            tool_dir: PathBuf::from("/opt/scipion/software/em/cryoten-1.0.0/cryoten"),
            conda_env: "cryoten_env".to_string(),
            gpu,
        }
    }

    #[test]
    fn passes_paths_as_positional_arguments() {
        let command = build_enhance_command(
            &config(GpuSelection::Inherit),
            Path::new("/proj/map.mrc"),
            Path::new("/proj/Runs/run001/extra/map.mrc"),
        );
        let args = &command.spec.args;
        assert_eq!(command.spec.program, "bash");
        assert_eq!(args[0], "-c");
        assert_eq!(args[2], "cryoten");
        assert_eq!(
            &args[3..],
            [
                "/opt/conda/etc/profile.d/conda.sh",
                "cryoten_env",
                "/opt/scipion/software/em/cryoten-1.0.0/cryoten",
                "/proj/map.mrc",
                "/proj/Runs/run001/extra/map.mrc",
            ]
        );
        assert!(command.spec.env.is_empty());
    }

    #[test]
    fn script_runs_phases_in_order() {
        let order = ["source", "conda activate", "cd", "exec python eval.py"];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| RUN_SCRIPT.find(needle).expect("phase present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn hostile_paths_stay_out_of_the_script() {
        let input = Path::new("/proj/map; rm -rf ~.mrc");
        let command = build_enhance_command(
            &config(GpuSelection::Inherit),
            input,
            Path::new("/proj/out $(id).mrc"),
        );
        assert_eq!(command.spec.args[1], RUN_SCRIPT);
        assert_eq!(command.spec.args[6], "/proj/map; rm -rf ~.mrc");
        assert_eq!(command.spec.args[7], "/proj/out $(id).mrc");
    }

    #[test]
    fn gpu_device_is_exported_to_the_child() {
        let command = build_enhance_command(
            &config(GpuSelection::Device(1)),
            Path::new("/in.mrc"),
            Path::new("/out.mrc"),
        );
        assert_eq!(
            command.spec.env,
            vec![("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn description_lists_gpu_export_before_cd() {
        let config = config(GpuSelection::Device(0));
        let command = build_enhance_command(&config, Path::new("/in.mrc"), Path::new("/out.mrc"));
        assert_eq!(
            describe(&command, &config),
            "source /opt/conda/etc/profile.d/conda.sh && conda activate cryoten_env && \
             export CUDA_VISIBLE_DEVICES=0 && cd /opt/scipion/software/em/cryoten-1.0.0/cryoten && \
             python eval.py /in.mrc /out.mrc"
        );
    }
}
