#![allow(dead_code)]

use std::collections::BTreeMap;

use dagrun::pipeline::spec::{ErrPolicy, RunPolicy, Secret, Spec, Step};
use dagrun::pipeline::state::{Build, RunState, Stage};

/// In-memory step implementation for tests.
#[derive(Debug, Clone)]
pub struct TestStep {
    pub name: String,
    pub dependencies: Vec<String>,
    pub run_policy: RunPolicy,
    pub err_policy: ErrPolicy,
    pub detached: bool,
    pub secrets: Vec<Secret>,
    pub environ: BTreeMap<String, String>,
}

impl Step for TestStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn run_policy(&self) -> RunPolicy {
        self.run_policy
    }

    fn err_policy(&self) -> ErrPolicy {
        self.err_policy
    }

    fn detached(&self) -> bool {
        self.detached
    }

    fn secrets(&self) -> &[Secret] {
        &self.secrets
    }

    fn environ(&self) -> &BTreeMap<String, String> {
        &self.environ
    }

    fn set_environ(&mut self, environ: BTreeMap<String, String>) {
        self.environ = environ;
    }

    fn clone_step(&self) -> Box<dyn Step> {
        Box::new(self.clone())
    }
}

/// In-memory spec implementation for tests.
#[derive(Debug, Clone)]
pub struct TestSpec {
    pub name: String,
    pub steps: Vec<TestStep>,
}

impl TestSpec {
    /// A fresh run state with one pending record per step.
    pub fn initial_state(&self) -> RunState {
        RunState::new(
            Build {
                number: 1,
                event: "push".to_string(),
                ..Build::default()
            },
            Stage::new("default", 1),
            self.steps.iter().map(|s| s.name.clone()),
        )
    }
}

impl Spec for TestSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_len(&self) -> usize {
        self.steps.len()
    }

    fn step_at(&self, index: usize) -> &dyn Step {
        &self.steps[index]
    }
}

/// Builder for [`TestSpec`] to simplify test setup.
pub struct SpecBuilder {
    spec: TestSpec,
}

impl SpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: TestSpec {
                name: name.to_string(),
                steps: Vec::new(),
            },
        }
    }

    pub fn with_step(mut self, step: TestStep) -> Self {
        self.spec.steps.push(step);
        self
    }

    pub fn build(self) -> TestSpec {
        self.spec
    }
}

/// Builder for [`TestStep`].
pub struct StepBuilder {
    step: TestStep,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            step: TestStep {
                name: name.to_string(),
                dependencies: Vec::new(),
                run_policy: RunPolicy::default(),
                err_policy: ErrPolicy::default(),
                detached: false,
                secrets: Vec::new(),
                environ: BTreeMap::new(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.dependencies.push(dep.to_string());
        self
    }

    pub fn run_policy(mut self, policy: RunPolicy) -> Self {
        self.step.run_policy = policy;
        self
    }

    pub fn err_policy(mut self, policy: ErrPolicy) -> Self {
        self.step.err_policy = policy;
        self
    }

    pub fn detached(mut self, val: bool) -> Self {
        self.step.detached = val;
        self
    }

    pub fn secret(mut self, name: &str, value: &str) -> Self {
        self.step.secrets.push(Secret::masked(name, value));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.step.environ.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TestStep {
        self.step
    }
}
