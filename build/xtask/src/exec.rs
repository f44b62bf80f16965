// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executes a declared build plan.
//!
//! Steps run sequentially in topological order, so every declared
//! dependency is complete before its dependents start. A smarter
//! executor could run independent steps in parallel without changing
//! any declaration; this one keeps the ordering guarantee and nothing
//! else. The first failing action aborts the build, leaving whatever
//! was already produced in place.

use std::io::Write;

use anyhow::{bail, Context, Result};
use log::info;
use termcolor::{Color, ColorSpec, WriteColor};

use crate::plan::{Action, BuildPlan, StepKind};

fn report_failure(step: &str) -> Result<()> {
    let color_choice = if atty::is(atty::Stream::Stderr) {
        termcolor::ColorChoice::Auto
    } else {
        termcolor::ColorChoice::Never
    };
    let mut out = termcolor::StandardStream::stderr(color_choice);
    let mut color = ColorSpec::new();
    color.set_fg(Some(Color::Red));
    out.set_color(&color)?;
    write!(out, "build failed: ")?;
    out.reset()?;
    writeln!(out, "step '{}'", step)?;
    Ok(())
}

fn run_action(action: &Action) -> Result<()> {
    match action {
        Action::Mkdir(dir) => std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display())),
        Action::Copy { src, dst } => {
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(src, dst).map(|_| ()).with_context(|| {
                format!("could not copy {} to {}", src.display(), dst.display())
            })
        }
        Action::Run(spec) => {
            let mut cmd = spec.to_command();
            let status = cmd
                .status()
                .with_context(|| format!("failed to run ({})", spec))?;
            if !status.success() {
                bail!("command failed, see output for details: {}", spec);
            }
            Ok(())
        }
    }
}

/// Runs every step of the plan. When `tests` is false, steps registered
/// with the test runner are declared but not executed.
pub fn run(plan: &BuildPlan, tests: bool) -> Result<()> {
    let order = plan.topo_order()?;
    for name in order {
        let step = plan.get(name).expect("step came from this plan");
        if step.kind == StepKind::Test && !tests {
            continue;
        }
        if !step.actions.is_empty() {
            info!("{}", name);
        }
        for action in &step.actions {
            if let Err(e) = run_action(action) {
                report_failure(name).ok();
                return Err(e.context(format!("step '{}'", name)));
            }
        }
    }
    Ok(())
}

/// Prints the plan in execution order without running anything.
pub fn print(plan: &BuildPlan) -> Result<()> {
    for name in plan.topo_order()? {
        let step = plan.get(name).expect("step came from this plan");
        if step.deps.is_empty() {
            println!("{}:", name);
        } else {
            let deps: Vec<&str> = step.deps.iter().map(String::as_str).collect();
            println!("{}: {}", name, deps.join(" "));
        }
        for action in &step.actions {
            match action {
                Action::Mkdir(dir) => println!("    mkdir -p {}", dir.display()),
                Action::Copy { src, dst } => {
                    println!("    cp {} {}", src.display(), dst.display())
                }
                Action::Run(spec) => println!("    {}", spec),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CommandSpec, Step};
    use crate::testutil;

    #[test]
    fn copy_and_mkdir_actions_execute() {
        let dir = testutil::scratch_dir("exec_copy");
        let src = dir.join("artifact.so");
        std::fs::write(&src, "binary").unwrap();
        let dst = dir.join("staging/cpu1/cf/artifact.so");

        let mut plan = BuildPlan::new();
        plan.add_step(
            "stage",
            Step::new(StepKind::Install)
                .action(Action::Mkdir(dir.join("staging/cpu1/cf")))
                .action(Action::Copy {
                    src: src.clone(),
                    dst: dst.clone(),
                }),
        )
        .unwrap();

        run(&plan, false).unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "binary");
    }

    #[test]
    fn failing_command_aborts_with_step_name() {
        let mut plan = BuildPlan::new();
        plan.add_step(
            "bad",
            Step::new(StepKind::Compile)
                .action(Action::Run(CommandSpec::new("false"))),
        )
        .unwrap();
        plan.add_step(
            "never",
            Step::new(StepKind::Install).dep("bad").action(Action::Mkdir(
                std::env::temp_dir().join("fsw-xtask-should-not-exist"),
            )),
        )
        .unwrap();

        let err = run(&plan, false).unwrap_err();
        assert!(format!("{:#}", err).contains("bad"));
        assert!(!std::env::temp_dir()
            .join("fsw-xtask-should-not-exist")
            .exists());
    }

    #[test]
    fn test_steps_are_skipped_unless_requested() {
        let mut plan = BuildPlan::new();
        plan.add_step(
            "run-sample",
            Step::new(StepKind::Test)
                .action(Action::Run(CommandSpec::new("false"))),
        )
        .unwrap();
        // Skipped, so the failing test command never runs.
        run(&plan, false).unwrap();
        assert!(run(&plan, true).is_err());
    }
}
