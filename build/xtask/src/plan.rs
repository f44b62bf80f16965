// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The declared build graph.
//!
//! The orchestrator never runs a compiler inline; it records named steps
//! with explicit dependencies and hands the whole graph to an executor.
//! The executor is free to schedule independent steps however it likes,
//! as long as every dependency completes before its dependents start.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use indexmap::IndexMap;

/// One shell command, recorded rather than executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Renders this spec into a runnable `Command`.
    pub fn to_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        for a in &self.args {
            cmd.arg(a);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {}", a)?;
        }
        Ok(())
    }
}

/// A single action within a step. Directory creation and staging copies
/// are performed by the executor itself rather than shelling out, so the
/// graph stays portable across hosts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Run(CommandSpec),
    Mkdir(PathBuf),
    Copy { src: PathBuf, dst: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Compile,
    Link,
    Table,
    Install,
    Test,
    /// Pure synchronization point; no actions of its own.
    Phony,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub actions: Vec<Action>,
    pub deps: BTreeSet<String>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            actions: Vec::new(),
            deps: BTreeSet::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn dep(mut self, dep: impl Into<String>) -> Self {
        self.deps.insert(dep.into());
        self
    }
}

/// The full graph for one architecture build, in declaration order.
#[derive(Debug, Default)]
pub struct BuildPlan {
    steps: IndexMap<String, Step>,
}

impl BuildPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a step. Re-declaring a step with identical contents is a
    /// no-op, so the module builders stay idempotent per name; declaring
    /// a different step under an existing name is a build-author mistake.
    pub fn add_step(&mut self, name: impl Into<String>, step: Step) -> Result<()> {
        let name = name.into();
        if let Some(existing) = self.steps.get(&name) {
            if *existing != step {
                bail!("conflicting definitions for build step '{}'", name);
            }
            return Ok(());
        }
        self.steps.insert(name, step);
        Ok(())
    }

    /// Adds a dependency edge to an already-declared step. The dependency
    /// itself may be declared later; `topo_order` validates the final
    /// graph.
    pub fn depend(&mut self, name: &str, dep: impl Into<String>) -> Result<()> {
        match self.steps.get_mut(name) {
            Some(step) => {
                step.deps.insert(dep.into());
                Ok(())
            }
            None => bail!("cannot add dependency to unknown step '{}'", name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Step)> {
        self.steps.iter()
    }

    /// Returns the step names in an order where every dependency precedes
    /// its dependents. Unknown dependencies and cycles are fatal.
    pub fn topo_order(&self) -> Result<Vec<&str>> {
        for (name, step) in &self.steps {
            if let Some(dep) = step.deps.iter().find(|d| !self.steps.contains_key(*d)) {
                bail!("step '{}' depends on undeclared step '{}'", name, dep);
            }
        }

        // Kahn's algorithm, biased toward declaration order so the
        // executor's output stays readable.
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, step) in &self.steps {
            pending.insert(name.as_str(), step.deps.len());
            for dep in &step.deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut order = Vec::with_capacity(self.steps.len());
        loop {
            let ready = self
                .steps
                .keys()
                .map(|n| n.as_str())
                .find(|n| pending.get(n) == Some(&0));
            let name = match ready {
                Some(n) => n,
                None => break,
            };
            pending.remove(name);
            order.push(name);
            if let Some(users) = dependents.get(name) {
                for user in users {
                    if let Some(count) = pending.get_mut(user) {
                        *count -= 1;
                    }
                }
            }
        }

        if !pending.is_empty() {
            let stuck: Vec<&str> = pending.keys().copied().collect();
            bail!("dependency cycle among build steps: {}", stuck.join(", "));
        }
        Ok(order)
    }
}
