// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unit test harness builder.
//!
//! A test executable is the fixed harness entry point linked against an
//! instrumented build of the library under test. Coverage flags merge
//! with whatever flags are already configured, and the test binary gets
//! a reference-directory define so it can find its fixture data.

use anyhow::Result;

use crate::arch::ArchBuildContext;
use crate::config::ModuleConfig;
use crate::modules::{self, COVERAGE_FLAGS};
use crate::plan::{Action, BuildPlan, CommandSpec, Step, StepKind};

/// Rollup step the test runner hangs every registered executable off of.
pub const TEST_RUNNER_STEP: &str = "utest-run";

/// Builds the coverage-instrumented test executable for one module and
/// registers it with the test runner under the test's own name. The
/// support libraries are instrumented stub archives the executable links
/// after the library under test.
pub fn add_unit_test_exe(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    test_name: &str,
    module: &ModuleConfig,
    support_libs: &[&str],
) -> Result<String> {
    let lib_step = modules::add_unit_test_lib(plan, ctx, module)?;

    let harness_dir = ctx.harness_dir()?;
    let exe = ctx.build_dir.join("ut").join(test_name);

    let mut flags: Vec<String> =
        COVERAGE_FLAGS.iter().map(|f| f.to_string()).collect();
    flags.extend(ctx.mission.flags("UT_COVERAGE_COMPILE_FLAGS"));
    let mut link_flags: Vec<String> =
        COVERAGE_FLAGS.iter().map(|f| f.to_string()).collect();
    link_flags.extend(ctx.mission.flags("UT_COVERAGE_LINK_FLAGS"));

    let mut cmd = CommandSpec::new(&ctx.cc)
        .args(ctx.compile_flags.iter().cloned())
        .args(flags)
        .arg(format!("-DUT_REFDIR=\"{}\"", module.dir.display()))
        .arg(format!("-I{}", harness_dir.join("inc").display()))
        .arg(format!("-I{}", module.dir.display()))
        .arg(harness_dir.join("src").join("ut_main.c").display().to_string())
        .arg(ctx.ut_lib_path(&module.name).display().to_string());
    for lib in support_libs {
        cmd = cmd.arg(ctx.ut_lib_path(lib).display().to_string());
    }
    cmd = cmd
        .args(link_flags)
        .arg("-o")
        .arg(exe.display().to_string());
    for inc in &ctx.include_dirs {
        cmd = cmd.arg(format!("-I{}", inc.display()));
    }

    let step_name = format!("ut-{}", test_name);
    let mut step = Step::new(StepKind::Link)
        .action(Action::Mkdir(exe.parent().expect("ut dir").to_path_buf()))
        .action(Action::Run(cmd))
        .dep(lib_step);
    for lib in support_libs {
        step = step.dep(format!("utlib-{}", lib));
    }
    plan.add_step(&step_name, step)?;

    // Register with the test runner under the test's own name.
    let run = Step::new(StepKind::Test)
        .action(Action::Run(CommandSpec::new(exe.display().to_string())))
        .dep(step_name.clone());
    let run_name = format!("run-{}", test_name);
    plan.add_step(&run_name, run)?;
    if !plan.contains(TEST_RUNNER_STEP) {
        plan.add_step(TEST_RUNNER_STEP, Step::new(StepKind::Phony))?;
    }
    plan.depend(TEST_RUNNER_STEP, run_name)?;

    Ok(step_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use indoc::indoc;

    fn fixture(test: &str) -> (ArchBuildContext, ModuleConfig) {
        let dir = testutil::scratch_dir(test);
        std::fs::write(
            dir.join("module.toml"),
            indoc! {r#"
                name = "sample"
                sources = ["src/sample.c"]
            "#},
        )
        .unwrap();
        let module = ModuleConfig::from_dir(&dir).unwrap();
        let ctx = crate::arch::test_context(&dir);
        (ctx, module)
    }

    #[test]
    fn test_exe_registers_with_runner() {
        let (ctx, module) = fixture("ut_exe");
        let mut plan = BuildPlan::new();
        add_unit_test_exe(&mut plan, &ctx, "sample-ut", &module, &[]).unwrap();

        assert!(plan.contains("utlib-sample"));
        assert!(plan.contains("ut-sample-ut"));
        let runner = plan.get(TEST_RUNNER_STEP).unwrap();
        assert!(runner.deps.contains("run-sample-ut"));
        plan.topo_order().unwrap();
    }

    #[test]
    fn coverage_flags_merge_with_configured_flags() {
        let (mut ctx, module) = fixture("ut_flags");
        ctx.compile_flags = vec!["-O0".to_string()];
        ctx.mission.set("UT_COVERAGE_LINK_FLAGS", "-lgcov");
        let mut plan = BuildPlan::new();
        add_unit_test_exe(&mut plan, &ctx, "sample-ut", &module, &[]).unwrap();
        let step = plan.get("ut-sample-ut").unwrap();
        let rendered = format!("{:?}", step.actions);
        assert!(rendered.contains("-O0"));
        assert!(rendered.contains("--coverage"));
        assert!(rendered.contains("-lgcov"));
        assert!(rendered.contains("UT_REFDIR"));
    }

    #[test]
    fn notfound_sentinel_reads_as_no_flags() {
        let (mut ctx, module) = fixture("ut_sentinel");
        ctx.mission
            .set("UT_COVERAGE_LINK_FLAGS", "UT_COVERAGE_LINK_FLAGS-NOTFOUND");
        let mut plan = BuildPlan::new();
        add_unit_test_exe(&mut plan, &ctx, "sample-ut", &module, &[]).unwrap();
        let rendered =
            format!("{:?}", plan.get("ut-sample-ut").unwrap().actions);
        assert!(!rendered.contains("NOTFOUND"));
    }
}
