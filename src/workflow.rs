use crate::cli::{EnhanceArgs, EnvArgs, InstallArgs, StatusArgs};
use crate::command::describe;
use crate::config::GpuSelection;
use crate::error::EnhanceError;
use crate::install::{plan_install, run_install as execute_install, InstallTarget};
use crate::invoke::SystemInvoker;
use crate::mrc;
use crate::paths::{RunPaths, ToolPaths};
use crate::registry::{self, RunStore, Volume};
use crate::resolve::{self, activation_script_for};
use crate::step::{EnhanceStep, StepState};
use crate::util::display_path;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct EnhanceReport<'a> {
    state: StepState,
    dry_run: bool,
    input: &'a Volume,
    output: Option<Volume>,
    command: String,
}

pub fn run_enhance(args: &EnhanceArgs) -> Result<()> {
    let project = project_root(&args.project)?;
    let run = RunPaths::new(project.clone(), args.run.clone());
    let sampling_rate = match args.sampling_rate {
        Some(rate) => rate,
        None => {
            let input_path = run.resolve_input(&args.input);
            mrc::read_sampling_rate(&input_path)
                .map_err(|err| EnhanceError::resolution(format!("{err:#}")))
                .context("sampling rate not given and not readable from the input header")?
        }
    };

    let invoker = SystemInvoker;
    let input = Volume {
        file_name: args.input.clone(),
        sampling_rate,
    };
    let mut step = EnhanceStep::new(&invoker, run.clone(), input);
    let gpu = GpuSelection::from_flags(!args.no_gpu, args.gpu);
    let config = step.resolve_environment(&args.environment.settings(), gpu)?;

    let output = if args.dry_run {
        step.build_command()?;
        None
    } else {
        let mut store = RunStore::new(run.outputs_path());
        let volume = step.execute(&mut store)?;
        tracing::info!(store = %store.path().display(), "output registered");
        Some(volume)
    };
    let command = step.command().context("command not built")?;
    let description = describe(command, &config);

    if args.json {
        let report = EnhanceReport {
            state: step.state(),
            dry_run: args.dry_run,
            input: step.input(),
            output,
            command: description,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match output {
        Some(volume) => println!(
            "registered {} -> {} ({} Å/px)",
            registry::OUTPUT_NAME,
            display_path(&volume.file_name, Some(&project)),
            volume.sampling_rate
        ),
        None => println!("{description}"),
    }
    Ok(())
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let project = project_root(&args.project)?;
    let run = RunPaths::new(project, args.run.clone());
    if !run.run_dir().is_dir() {
        anyhow::bail!("run directory not found at {}", run.run_dir().display());
    }
    let store = RunStore::new(run.outputs_path());
    let objects = store.load()?;
    let summary = registry::summary(&objects);
    let methods = registry::methods();

    if args.json {
        let value = json!({
            "run_id": run.run_id(),
            "outputs": objects.outputs,
            "relations": objects.relations,
            "summary": summary,
            "methods": methods,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Summary:");
    for line in summary {
        println!("  {line}");
    }
    println!("Methods:");
    for line in methods {
        println!("  {line}");
    }
    Ok(())
}

pub fn run_install(args: &InstallArgs) -> Result<()> {
    let settings = args.environment.settings();
    let invoker = SystemInvoker;
    let conda = resolve::locate_conda(settings.conda.as_deref())?;
    let conda_base = resolve::conda_base(&invoker, &conda)?;
    let activation_script = resolve::existing_activation_script(&conda_base)?;
    let base = resolve::platform_base(settings.platform_base.as_deref())?;
    let target = InstallTarget {
        tool: ToolPaths::new(&base, &settings.version),
        conda_base: &conda_base,
        activation_script: &activation_script,
        conda_env: &settings.conda_env,
    };
    let plan = plan_install(&target)?;

    if plan.is_complete() {
        println!(
            "cryoten already installed at {}",
            plan.tool.install_dir().display()
        );
        return Ok(());
    }
    if args.dry_run {
        for step in &plan.steps {
            println!("{}: {}", step.label, step.spec.display_line());
        }
        println!("write {}", plan.tool.marker_path().display());
        return Ok(());
    }

    let marker = execute_install(&invoker, &plan)?;
    tracing::info!(marker = %marker.display(), "cryoten installed");
    println!(
        "cryoten installed at {}",
        plan.tool.install_dir().display()
    );
    Ok(())
}

pub fn run_env(args: &EnvArgs) -> Result<()> {
    let settings = args.environment.settings();
    let invoker = SystemInvoker;
    let message = |err: EnhanceError| err.to_string();

    let conda = resolve::locate_conda(settings.conda.as_deref()).map_err(message);
    let conda_base = conda
        .clone()
        .and_then(|conda| resolve::conda_base(&invoker, &conda).map_err(message));
    let activation = conda_base
        .clone()
        .map(|base| activation_script_for(&base));
    let base = resolve::platform_base(settings.platform_base.as_deref()).map_err(message);
    let tool_dir = base.clone().and_then(|base| {
        resolve::resolve_tool_install_dir(&base, &settings.version).map_err(message)
    });
    let installed = base
        .as_ref()
        .is_ok_and(|base| ToolPaths::new(base, &settings.version).marker_path().is_file());

    let entries = [
        ("conda", path_entry(&conda)),
        ("conda_base", path_entry(&conda_base)),
        ("activation_script", existing_entry(&activation)),
        ("scipion_home", path_entry(&base)),
        ("tool_dir", path_entry(&tool_dir)),
    ];

    if args.json {
        let mut value = serde_json::Map::new();
        for (key, entry) in &entries {
            value.insert(key.to_string(), json!(entry));
        }
        value.insert("conda_env".to_string(), json!(settings.conda_env));
        value.insert("installed".to_string(), json!(installed));
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (key, entry) in &entries {
        match entry {
            EnvEntry::Found { path } => println!("{key}: {}", path.display()),
            EnvEntry::Missing { path } => println!("{key}: {} (missing)", path.display()),
            EnvEntry::Error { error } => println!("{key}: error: {error}"),
        }
    }
    println!("conda_env: {}", settings.conda_env);
    println!("installed: {}", if installed { "yes" } else { "no" });
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum EnvEntry {
    Found { path: PathBuf },
    Missing { path: PathBuf },
    Error { error: String },
}

fn path_entry(resolved: &Result<PathBuf, String>) -> EnvEntry {
    match resolved {
        Ok(path) => EnvEntry::Found { path: path.clone() },
        Err(error) => EnvEntry::Error {
            error: error.clone(),
        },
    }
}

fn existing_entry(resolved: &Result<PathBuf, String>) -> EnvEntry {
    match resolved {
        Ok(path) if path.exists() => EnvEntry::Found { path: path.clone() },
        Ok(path) => EnvEntry::Missing { path: path.clone() },
        Err(error) => EnvEntry::Error {
            error: error.clone(),
        },
    }
}

fn project_root(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolve project root {}", path.display()))
}
