// src/environ.rs

//! Environment variable composition for step execution.
//!
//! A step's effective environment is the ordered merge of its own variables
//! with variables derived from the build, the stage, and the step's own
//! state record. All helpers are pure so composing twice yields the same
//! map.

use std::collections::BTreeMap;

use crate::pipeline::state::{Build, Stage, StepState};

/// Merge environment layers; later layers override earlier ones.
pub fn combine<I>(layers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = BTreeMap<String, String>>,
{
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(layer);
    }
    merged
}

/// Variables derived from the build.
pub fn build(build: &Build) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CI".to_string(), "true".to_string()),
        ("DAGRUN".to_string(), "true".to_string()),
        (
            "DAGRUN_BUILD_NUMBER".to_string(),
            build.number.to_string(),
        ),
        ("DAGRUN_BUILD_EVENT".to_string(), build.event.clone()),
        ("DAGRUN_BUILD_LINK".to_string(), build.link.clone()),
        ("DAGRUN_COMMIT_SHA".to_string(), build.commit.clone()),
        ("DAGRUN_COMMIT_BRANCH".to_string(), build.branch.clone()),
    ])
}

/// Variables derived from the stage.
pub fn stage(stage: &Stage) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DAGRUN_STAGE_NAME".to_string(), stage.name.clone()),
        (
            "DAGRUN_STAGE_NUMBER".to_string(),
            stage.number.to_string(),
        ),
    ])
}

/// Variables derived from the step's state record.
pub fn step(step: &StepState) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DAGRUN_STEP_NAME".to_string(), step.name.clone()),
        ("DAGRUN_STEP_NUMBER".to_string(), step.number.to_string()),
    ])
}
