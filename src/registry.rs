//! Host object store: registered outputs and provenance relations for a run.
//!
//! The store is a JSON document at `Runs/<run-id>/outputs.json`; the step
//! never holds it open between phases.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name under which the enhanced volume is registered.
pub const OUTPUT_NAME: &str = "outputVolume";

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Handle to a density map file and its voxel size in Ångström.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub file_name: PathBuf,
    pub sampling_rate: f64,
}

/// Provenance edge: `child` was derived from `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRelation {
    pub parent: PathBuf,
    pub child: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunObjects {
    pub schema_version: u32,
    #[serde(default)]
    pub outputs: BTreeMap<String, Volume>,
    #[serde(default)]
    pub relations: Vec<SourceRelation>,
}

impl RunObjects {
    /// Replace `name`, dropping provenance recorded for the previous value.
    fn set_output(&mut self, name: &str, volume: &Volume) {
        self.outputs.insert(name.to_string(), volume.clone());
        self.relations.retain(|relation| relation.child != name);
    }

    fn add_relation(&mut self, parent: &Volume, child_name: &str) {
        let relation = SourceRelation {
            parent: parent.file_name.clone(),
            child: child_name.to_string(),
        };
        if !self.relations.contains(&relation) {
            self.relations.push(relation);
        }
    }
}

impl Default for RunObjects {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            outputs: BTreeMap::new(),
            relations: Vec::new(),
        }
    }
}

/// What the step needs from the host to publish its result.
pub trait ObjectStore {
    fn define_output(&mut self, name: &str, volume: &Volume) -> Result<()>;
    fn define_source_relation(&mut self, parent: &Volume, child_name: &str) -> Result<()>;

    /// Register `output` under `name` together with its source edge.
    fn publish_output(&mut self, name: &str, output: &Volume, parent: &Volume) -> Result<()> {
        self.define_output(name, output)?;
        self.define_source_relation(parent, name)
    }
}

/// `ObjectStore` persisted as the run's `outputs.json`.
#[derive(Debug, Clone)]
pub struct RunStore {
    path: PathBuf,
}

impl RunStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RunObjects> {
        if !self.path.is_file() {
            return Ok(RunObjects::default());
        }
        let bytes =
            fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse run objects {}", self.path.display()))
    }

    fn update(&self, apply: impl FnOnce(&mut RunObjects)) -> Result<()> {
        let mut objects = self.load()?;
        apply(&mut objects);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&objects).context("serialize run objects")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text.as_bytes()).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("publish {}", self.path.display()))?;
        Ok(())
    }
}

impl ObjectStore for RunStore {
    fn define_output(&mut self, name: &str, volume: &Volume) -> Result<()> {
        self.update(|objects| objects.set_output(name, volume))
    }

    fn define_source_relation(&mut self, parent: &Volume, child_name: &str) -> Result<()> {
        self.update(|objects| objects.add_relation(parent, child_name))
    }

    // One write, so the output never lands without its edge.
    fn publish_output(&mut self, name: &str, output: &Volume, parent: &Volume) -> Result<()> {
        self.update(|objects| {
            objects.set_output(name, output);
            objects.add_relation(parent, name);
        })
    }
}

/// Summary lines for a run, as shown in the host's run panel.
pub fn summary(objects: &RunObjects) -> Vec<String> {
    let Some(volume) = objects.outputs.get(OUTPUT_NAME) else {
        return vec!["No output registered yet.".to_string()];
    };
    let mut lines = vec![
        format!("Output file path set to: {}", volume.file_name.display()),
        format!("Sampling rate: {} Å/px", volume.sampling_rate),
    ];
    for relation in objects.relations.iter().filter(|r| r.child == OUTPUT_NAME) {
        lines.push(format!("Derived from: {}", relation.parent.display()));
    }
    lines
}

pub fn methods() -> Vec<String> {
    vec!["This protocol enhances a map using the Cryoten software.".to_string()]
}
