// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builders for the individual buildable units: PSP driver modules,
//! applications, and the instrumented libraries used by unit tests.
//!
//! Link mode is an explicit property here. The processor derives it from
//! the install-destination list, so the observable rule still holds:
//! a module with no destinations is statically linked, a module with at
//! least one destination becomes a loadable module and is staged to each
//! destination.

use std::path::PathBuf;

use anyhow::Result;
use log::debug;

use crate::arch::ArchBuildContext;
use crate::config::ModuleConfig;
use crate::install::InstallHooks;
use crate::plan::{Action, BuildPlan, CommandSpec, Step, StepKind};

/// Compiler and linker flags added to instrumented unit-test builds, on
/// top of whatever flags are already configured.
pub const COVERAGE_FLAGS: &[&str] = &["-pg", "--coverage"];

/// Preprocessor define carried by every PSP driver module.
pub const PSP_MODULE_DEFINE: &str = "_CFE_PSP_MODULE_";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkMode {
    Static,
    Loadable,
}

/// A module with no install destinations builds statically; one with any
/// destination builds as a loadable module.
pub fn link_mode_for(dests: &[String]) -> LinkMode {
    if dests.is_empty() {
        LinkMode::Static
    } else {
        LinkMode::Loadable
    }
}

/// Emits the compile actions shared by every builder: one object per
/// source file, under the module's own object directory.
fn compile_actions(
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
    obj_dir: &PathBuf,
    extra_flags: &[String],
    extra_includes: &[PathBuf],
    extra_defines: &[String],
) -> (Vec<Action>, Vec<PathBuf>) {
    let mut actions = vec![Action::Mkdir(obj_dir.clone())];
    let mut objects = Vec::new();
    for src in module.source_paths() {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "src".to_string());
        let obj = obj_dir.join(format!("{}.o", stem));
        let mut cmd = CommandSpec::new(&ctx.cc)
            .args(ctx.compile_flags.iter().cloned())
            .args(extra_flags.iter().cloned());
        for d in ctx.defines.iter().chain(module.defines.iter()).chain(extra_defines) {
            cmd = cmd.arg(format!("-D{}", d));
        }
        for inc in ctx
            .include_dirs
            .iter()
            .cloned()
            .chain(module.includes.iter().map(|i| module.dir.join(i)))
            .chain(extra_includes.iter().cloned())
        {
            cmd = cmd.arg(format!("-I{}", inc.display()));
        }
        cmd = cmd
            .arg("-c")
            .arg(src.display().to_string())
            .arg("-o")
            .arg(obj.display().to_string());
        actions.push(Action::Run(cmd));
        objects.push(obj);
    }
    (actions, objects)
}

/// Builds a static library step named `lib-<name>` (or the caller's
/// choice), archiving every object with `ar`.
fn add_static_library(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    step_name: &str,
    module: &ModuleConfig,
    out: &PathBuf,
    extra_flags: &[String],
    extra_includes: &[PathBuf],
    extra_defines: &[String],
) -> Result<()> {
    let obj_dir = ctx.obj_dir(&module.name);
    let (mut actions, objects) = compile_actions(
        ctx,
        module,
        &obj_dir,
        extra_flags,
        extra_includes,
        extra_defines,
    );
    if let Some(parent) = out.parent() {
        actions.insert(0, Action::Mkdir(parent.to_path_buf()));
    }
    let mut ar = CommandSpec::new(&ctx.ar)
        .arg("rcs")
        .arg(out.display().to_string());
    for obj in &objects {
        ar = ar.arg(obj.display().to_string());
    }
    actions.push(Action::Run(ar));

    let mut step = Step::new(StepKind::Compile);
    step.actions = actions;
    plan.add_step(step_name, step)?;
    debug!("declared static library {} -> {}", module.name, out.display());
    Ok(())
}

/// Builds a PSP driver module: always statically linked, always carrying
/// the shared PSP include path and the driver define.
pub fn add_driver_module(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
) -> Result<String> {
    let step_name = format!("lib-{}", module.name);
    add_static_library(
        plan,
        ctx,
        &step_name,
        module,
        &ctx.lib_path(&module.name),
        &[],
        &[ctx.psp_include_dir()?],
        &[PSP_MODULE_DEFINE.to_string()],
    )?;
    Ok(step_name)
}

/// Builds an application or library module. `Static` produces a library
/// only; `Loadable` produces a module linked against the named libraries
/// and immediately registers the install copies for each destination.
///
/// A single module cannot be statically linked for one target and
/// loadable for another within the same architecture build.
pub fn add_app_module(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
    link_mode: LinkMode,
    link_against: &[&str],
    dests: &[String],
    hooks: &dyn InstallHooks,
) -> Result<String> {
    match link_mode {
        LinkMode::Static => {
            let step_name = format!("lib-{}", module.name);
            add_static_library(
                plan,
                ctx,
                &step_name,
                module,
                &ctx.lib_path(&module.name),
                &[],
                &[],
                &[],
            )?;
            Ok(step_name)
        }
        LinkMode::Loadable => {
            let step_name = format!("app-{}", module.name);
            let out = ctx.app_path(&module.name);
            let obj_dir = ctx.obj_dir(&module.name);
            let pic = ["-fPIC".to_string()];
            let (mut actions, objects) =
                compile_actions(ctx, module, &obj_dir, &pic, &[], &[]);

            actions.push(Action::Mkdir(
                out.parent().expect("app path has a parent").to_path_buf(),
            ));
            let mut link = CommandSpec::new(&ctx.cc)
                .arg("-shared")
                .arg("-o")
                .arg(out.display().to_string());
            for obj in &objects {
                link = link.arg(obj.display().to_string());
            }
            for lib in link_against {
                link = link.arg(ctx.lib_path(lib).display().to_string());
            }
            actions.push(Action::Run(link));

            let mut step = Step::new(StepKind::Link);
            step.actions = actions;
            for lib in link_against {
                step.deps.insert(format!("lib-{}", lib));
            }
            plan.add_step(&step_name, step)?;

            hooks.install_module(plan, ctx, &module.name, &out, &step_name, dests)?;
            Ok(step_name)
        }
    }
}

/// Builds one core-executive library variant. The step and archive are
/// keyed by platform config so two targets sharing a (architecture,
/// platform-config) pair share a single build.
pub fn add_core_library(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
    platform: &str,
    generated_inc: &PathBuf,
) -> Result<String> {
    let mut variant = module.clone();
    variant.name = format!("core-{}", platform);
    let step_name = format!("lib-{}", variant.name);
    add_static_library(
        plan,
        ctx,
        &step_name,
        &variant,
        &ctx.lib_path(&variant.name),
        &[],
        &[generated_inc.clone()],
        &[],
    )?;
    Ok(step_name)
}

/// Builds the library under test with coverage instrumentation appended
/// to (never replacing) the configured flags.
pub fn add_unit_test_lib(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
) -> Result<String> {
    let step_name = format!("utlib-{}", module.name);
    let mut flags: Vec<String> =
        COVERAGE_FLAGS.iter().map(|f| f.to_string()).collect();
    flags.extend(ctx.mission.flags("UT_COVERAGE_COMPILE_FLAGS"));
    add_static_library(
        plan,
        ctx,
        &step_name,
        module,
        &ctx.ut_lib_path(&module.name),
        &flags,
        &[],
        &[],
    )?;
    Ok(step_name)
}
