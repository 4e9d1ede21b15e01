//! CLI argument parsing for the map enhancement step.
//!
//! The CLI only collects inputs; discovery and validation happen once in the
//! step's resolution phase.
use crate::config::{EnvironmentSettings, DEFAULT_CONDA_ENV, TOOL_VERSION};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cryoten",
    version,
    about = "Enhance cryo-EM density maps with CryoTEN inside a Scipion-style project",
    after_help = "Examples:\n  cryoten install\n  cryoten env\n  cryoten enhance --project ~/ScipionUserData/projects/demo --run 000042_CryotenPrefixEnhace --input Runs/000002_ProtImportVolumes/extra/map.mrc --gpu 0\n  cryoten status --project ~/ScipionUserData/projects/demo --run 000042_CryotenPrefixEnhace",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (CRYOTEN_LOG overrides)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Enhance(EnhanceArgs),
    Install(InstallArgs),
    Status(StatusArgs),
    Env(EnvArgs),
}

/// Where to find conda and the tool install.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
    /// conda executable (defaults to CONDA_EXE, then PATH)
    #[arg(long, value_name = "PATH")]
    pub conda: Option<PathBuf>,

    /// Scipion installation root (defaults to SCIPION_HOME, then ~/scipion)
    #[arg(long, value_name = "DIR")]
    pub scipion_home: Option<PathBuf>,

    /// conda environment the tool runs in
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CONDA_ENV)]
    pub conda_env: String,

    /// CryoTEN release directory to use under software/em
    #[arg(long, value_name = "VERSION", default_value = TOOL_VERSION)]
    pub tool_version: String,
}

impl EnvironmentArgs {
    pub fn settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            conda: self.conda.clone(),
            platform_base: self.scipion_home.clone(),
            conda_env: self.conda_env.clone(),
            version: self.tool_version.clone(),
        }
    }
}

/// Run the enhancement step for one input volume.
#[derive(Parser, Debug)]
#[command(about = "Enhance a density map and register the result in the run")]
pub struct EnhanceArgs {
    /// Project root containing the Runs/ directory
    #[arg(long, value_name = "DIR")]
    pub project: PathBuf,

    /// Run directory name under Runs/
    #[arg(long, value_name = "ID")]
    pub run: String,

    /// Input volume, absolute or relative to the project root
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Input voxel size in Å/px (read from the MRC header when omitted)
    #[arg(long, value_name = "A_PER_PX", value_parser = parse_sampling_rate)]
    pub sampling_rate: Option<f64>,

    /// GPU device index to expose to the tool
    #[arg(long, value_name = "INDEX", conflicts_with = "no_gpu")]
    pub gpu: Option<u32>,

    /// Hide all GPUs from the tool
    #[arg(long)]
    pub no_gpu: bool,

    /// Resolve and print the command without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub environment: EnvironmentArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Install the CryoTEN checkout, weights, and conda environment")]
pub struct InstallArgs {
    /// Print the planned steps without running them
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub environment: EnvironmentArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Summarize a run's registered output")]
pub struct StatusArgs {
    /// Project root containing the Runs/ directory
    #[arg(long, value_name = "DIR")]
    pub project: PathBuf,

    /// Run directory name under Runs/
    #[arg(long, value_name = "ID")]
    pub run: String,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Report conda and CryoTEN discovery without running the tool")]
pub struct EnvArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub environment: EnvironmentArgs,
}

fn parse_sampling_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw
        .parse()
        .map_err(|err| format!("invalid sampling rate {raw:?}: {err}"))?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(format!("sampling rate must be positive (got {raw})"));
    }
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn parses_enhance_with_gpu() {
        let args = RootArgs::try_parse_from([
            "cryoten",
            "enhance",
            "--project",
            "/proj",
            "--run",
            "run001",
            "--input",
            "map.mrc",
            "--sampling-rate",
            "1.5",
            "--gpu",
            "0",
        ])
        .expect("parse enhance");
        let Command::Enhance(enhance) = args.command else {
            panic!("expected enhance");
        };
        assert_eq!(enhance.sampling_rate, Some(1.5));
        assert_eq!(enhance.gpu, Some(0));
        assert_eq!(enhance.environment.conda_env, "cryoten_env");
        assert_eq!(enhance.environment.tool_version, "1.0.0");
    }

    #[test]
    fn rejects_non_positive_sampling_rate() {
        assert!(parse_sampling_rate("0").is_err());
        assert!(parse_sampling_rate("-1.2").is_err());
        assert!(parse_sampling_rate("NaN").is_err());
        assert_eq!(parse_sampling_rate("0.83"), Ok(0.83));
    }

    #[test]
    fn gpu_and_no_gpu_conflict() {
        let parsed = RootArgs::try_parse_from([
            "cryoten", "enhance", "--project", "/p", "--run", "r", "--input", "m.mrc", "--gpu",
            "1", "--no-gpu",
        ]);
        assert!(parsed.is_err());
    }
}
