//! The "enhance map" step: resolve, build, invoke, verify, register.
//!
//! Phases advance a single state value. A phase called out of order fails with
//! `EnhanceError::State`, and any failure parks the step in `Failed`, so no
//! later phase can run after an error.
use crate::command::{build_enhance_command, describe, EnhanceCommand};
use crate::config::{EnvironmentSettings, GpuSelection, StepConfig};
use crate::error::{EnhanceError, MAX_ERROR_STDERR_BYTES};
use crate::invoke::{CommandOutput, ExternalInvoker};
use crate::paths::RunPaths;
use crate::registry::{ObjectStore, Volume, OUTPUT_NAME};
use crate::resolve::resolve_step_config;
use crate::util::tail_string;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    EnvironmentResolved,
    CommandBuilt,
    Invoked,
    OutputVerified,
    Registered,
    Failed,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Registered | Self::Failed)
    }
}

pub struct EnhanceStep<'a> {
    invoker: &'a dyn ExternalInvoker,
    run: RunPaths,
    input: Volume,
    state: StepState,
    config: Option<StepConfig>,
    command: Option<EnhanceCommand>,
    output_path: Option<PathBuf>,
}

impl<'a> EnhanceStep<'a> {
    /// `input.file_name` may be relative to the project root.
    pub fn new(invoker: &'a dyn ExternalInvoker, run: RunPaths, input: Volume) -> Self {
        let input = Volume {
            file_name: run.resolve_input(&input.file_name),
            sampling_rate: input.sampling_rate,
        };
        Self {
            invoker,
            run,
            input,
            state: StepState::NotStarted,
            config: None,
            command: None,
            output_path: None,
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn input(&self) -> &Volume {
        &self.input
    }

    pub fn command(&self) -> Option<&EnhanceCommand> {
        self.command.as_ref()
    }

    /// Discover conda and the tool install, then check the input exists.
    pub fn resolve_environment(
        &mut self,
        settings: &EnvironmentSettings,
        gpu: GpuSelection,
    ) -> Result<StepConfig, EnhanceError> {
        let invoker = self.invoker;
        self.advance(
            StepState::NotStarted,
            StepState::EnvironmentResolved,
            |step| {
                step.check_input()?;
                let config = resolve_step_config(invoker, settings, gpu)?;
                step.config = Some(config.clone());
                Ok(config)
            },
        )
    }

    /// Use an already resolved configuration instead of discovering one.
    #[cfg(test)]
    pub fn use_config(&mut self, config: StepConfig) -> Result<(), EnhanceError> {
        self.advance(
            StepState::NotStarted,
            StepState::EnvironmentResolved,
            |step| {
                step.check_input()?;
                step.config = Some(config);
                Ok(())
            },
        )
    }

    pub fn build_command(&mut self) -> Result<EnhanceCommand, EnhanceError> {
        self.advance(
            StepState::EnvironmentResolved,
            StepState::CommandBuilt,
            |step| {
                let config = step
                    .config
                    .as_ref()
                    .ok_or_else(|| EnhanceError::state("configuration not resolved"))?;
                let output = step.run.output_for(&step.input.file_name).ok_or_else(|| {
                    EnhanceError::resolution(format!(
                        "input {} has no file name",
                        step.input.file_name.display()
                    ))
                })?;
                let command = build_enhance_command(config, &step.input.file_name, &output);
                tracing::info!(command = %describe(&command, config), "built cryoten command");
                step.output_path = Some(output);
                step.command = Some(command.clone());
                Ok(command)
            },
        )
    }

    /// Run the tool and wait for it; nonzero exit is an invocation error.
    ///
    /// A result left at the output path by an earlier attempt is removed first,
    /// so only a file written by this run can pass verification.
    pub fn invoke(&mut self) -> Result<CommandOutput, EnhanceError> {
        self.advance(StepState::CommandBuilt, StepState::Invoked, |step| {
            let command = step
                .command
                .as_ref()
                .ok_or_else(|| EnhanceError::state("command not built"))?;
            step.prepare_output(&command.output)?;
            let line = command.spec.display_line();
            let output = step
                .invoker
                .run(&command.spec)
                .map_err(|err| EnhanceError::Invocation {
                    command: line.clone(),
                    status: "failed to start".to_string(),
                    stderr: err.to_string(),
                })?;
            step.persist_logs(&output);
            if !output.success() {
                return Err(EnhanceError::Invocation {
                    command: line,
                    status: output.status_label(),
                    stderr: tail_string(output.stderr.trim(), MAX_ERROR_STDERR_BYTES),
                });
            }
            Ok(output)
        })
    }

    pub fn verify_output(&mut self) -> Result<PathBuf, EnhanceError> {
        self.advance(StepState::Invoked, StepState::OutputVerified, |step| {
            let path = step
                .output_path
                .clone()
                .ok_or_else(|| EnhanceError::state("output path is not set"))?;
            if !path.is_file() {
                return Err(EnhanceError::OutputMissing(path));
            }
            Ok(path)
        })
    }

    /// Publish the output volume and its provenance edge to `store`.
    pub fn register(&mut self, store: &mut dyn ObjectStore) -> Result<Volume, EnhanceError> {
        self.advance(StepState::OutputVerified, StepState::Registered, |step| {
            let path = step
                .output_path
                .clone()
                .ok_or_else(|| EnhanceError::state("output path is not set"))?;
            let output = Volume {
                file_name: path,
                sampling_rate: step.input.sampling_rate,
            };
            store
                .publish_output(OUTPUT_NAME, &output, &step.input)
                .map_err(|err| EnhanceError::Store(format!("{err:#}")))?;
            Ok(output)
        })
    }

    /// Drive every phase after environment resolution through registration.
    pub fn execute(&mut self, store: &mut dyn ObjectStore) -> Result<Volume, EnhanceError> {
        self.build_command()?;
        self.invoke()?;
        self.verify_output()?;
        self.register(store)
    }

    fn check_input(&self) -> Result<(), EnhanceError> {
        if self.input.file_name.is_file() {
            return Ok(());
        }
        Err(EnhanceError::resolution(format!(
            "input volume not found at {}",
            self.input.file_name.display()
        )))
    }

    fn prepare_output(&self, output: &Path) -> Result<(), EnhanceError> {
        let extra = self.run.extra_dir();
        fs::create_dir_all(&extra).map_err(|err| {
            EnhanceError::resolution(format!("create {}: {err}", extra.display()))
        })?;
        match fs::remove_file(output) {
            Ok(()) => {
                tracing::debug!(path = %output.display(), "removed stale output");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EnhanceError::resolution(format!(
                "remove stale output {}: {err}",
                output.display()
            ))),
        }
    }

    fn persist_logs(&self, output: &CommandOutput) {
        let dir = self.run.logs_dir();
        let written = fs::create_dir_all(&dir)
            .and_then(|()| fs::write(dir.join("cryoten.stdout"), output.stdout.as_bytes()))
            .and_then(|()| fs::write(dir.join("cryoten.stderr"), output.stderr.as_bytes()));
        if let Err(err) = written {
            tracing::warn!(dir = %dir.display(), %err, "could not persist tool output");
        }
    }

    fn advance<T>(
        &mut self,
        expected: StepState,
        next: StepState,
        phase: impl FnOnce(&mut Self) -> Result<T, EnhanceError>,
    ) -> Result<T, EnhanceError> {
        if self.state != expected {
            let err = EnhanceError::state(format!(
                "cannot enter {next:?} from {:?} (expected {expected:?})",
                self.state
            ));
            if !self.state.is_terminal() {
                self.state = StepState::Failed;
            }
            return Err(err);
        }
        match phase(self) {
            Ok(value) => {
                tracing::debug!(from = ?expected, to = ?next, "step transition");
                self.state = next;
                Ok(value)
            }
            Err(err) => {
                tracing::error!(phase = ?next, kind = err.kind(), "step failed: {err}");
                self.state = StepState::Failed;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
