// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Install strategy hooks.
//!
//! How a finished artifact lands in the staging tree varies per platform
//! support package, so the two copy policies live behind a trait with a
//! default implementation. A platform substitutes its own strategy at
//! configuration time; the callers never change.

use std::path::Path;

use anyhow::Result;

use crate::arch::ArchBuildContext;
use crate::config::LogicalTarget;
use crate::plan::{Action, BuildPlan, Step, StepKind};

pub trait InstallHooks {
    /// Copies the architecture's linked core executable into the staging
    /// directory named after the logical target.
    fn install_executable(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        target: &LogicalTarget,
        exe: &Path,
        exe_step: &str,
    ) -> Result<()>;

    /// Copies a loadable module into each requested destination's staging
    /// tree, named exactly after its logical name.
    fn install_module(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        module: &str,
        artifact: &Path,
        artifact_step: &str,
        dests: &[String],
    ) -> Result<()>;
}

/// Normalizes an artifact file name so the staged name matches the
/// module's logical name: any `lib` prefix goes, the extension stays.
fn staged_name(module: &str, artifact: &Path) -> String {
    let ext = artifact.extension().map(|e| e.to_string_lossy().into_owned());
    match ext {
        Some(ext) => format!("{}.{}", module, ext),
        None => module.to_string(),
    }
}

/// Staging layout `<target>/<install-subdir>/<artifact>`; executables go
/// directly under `<target>/`.
pub struct DefaultInstall;

impl InstallHooks for DefaultInstall {
    fn install_executable(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        target: &LogicalTarget,
        exe: &Path,
        exe_step: &str,
    ) -> Result<()> {
        let dest_dir = ctx.staging_dir.join(&target.name);
        let file = exe
            .file_name()
            .expect("executable path has a file name")
            .to_string_lossy()
            .into_owned();
        let step = Step::new(StepKind::Install)
            .action(Action::Mkdir(dest_dir.clone()))
            .action(Action::Copy {
                src: exe.to_path_buf(),
                dst: dest_dir.join(file),
            })
            .dep(exe_step);
        plan.add_step(format!("install-exe-{}", target.name), step)
    }

    fn install_module(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        module: &str,
        artifact: &Path,
        artifact_step: &str,
        dests: &[String],
    ) -> Result<()> {
        let name = staged_name(module, artifact);
        for dest in dests {
            let dest_dir = ctx
                .staging_dir
                .join(dest)
                .join(ctx.mission.install_subdir());
            let step = Step::new(StepKind::Install)
                .action(Action::Mkdir(dest_dir.clone()))
                .action(Action::Copy {
                    src: artifact.to_path_buf(),
                    dst: dest_dir.join(&name),
                })
                .dep(artifact_step);
            plan.add_step(format!("install-{}-{}", module, dest), step)?;
        }
        Ok(())
    }
}

/// Alternate layout for platforms whose loader wants everything in the
/// target directory itself, with no install subdirectory.
pub struct FlatInstall;

impl InstallHooks for FlatInstall {
    fn install_executable(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        target: &LogicalTarget,
        exe: &Path,
        exe_step: &str,
    ) -> Result<()> {
        DefaultInstall.install_executable(plan, ctx, target, exe, exe_step)
    }

    fn install_module(
        &self,
        plan: &mut BuildPlan,
        ctx: &ArchBuildContext,
        module: &str,
        artifact: &Path,
        artifact_step: &str,
        dests: &[String],
    ) -> Result<()> {
        let name = staged_name(module, artifact);
        for dest in dests {
            let dest_dir = ctx.staging_dir.join(dest);
            let step = Step::new(StepKind::Install)
                .action(Action::Mkdir(dest_dir.clone()))
                .action(Action::Copy {
                    src: artifact.to_path_buf(),
                    dst: dest_dir.join(&name),
                })
                .dep(artifact_step);
            plan.add_step(format!("install-{}-{}", module, dest), step)?;
        }
        Ok(())
    }
}

/// Selects the install strategy once, at configuration time. The cache's
/// `INSTALL_STYLE` wins; otherwise the PSP may carry its own preference.
pub fn hooks_for(ctx: &ArchBuildContext) -> Result<Box<dyn InstallHooks>> {
    let style = ctx
        .mission
        .get("INSTALL_STYLE")
        .or_else(|| ctx.mission.get(&format!("{}_INSTALL_STYLE", ctx.psp)))
        .unwrap_or("staged");
    match style {
        "staged" => Ok(Box::new(DefaultInstall)),
        "flat" => Ok(Box::new(FlatInstall)),
        other => anyhow::bail!("unknown install style '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BuildPlan;
    use crate::testutil;
    use std::path::PathBuf;

    #[test]
    fn staged_name_matches_logical_name() {
        assert_eq!(
            staged_name("sch", Path::new("/b/apps/libsch.so")),
            "sch.so"
        );
        assert_eq!(staged_name("core", Path::new("/b/core-cpu1")), "core");
    }

    #[test]
    fn default_module_install_uses_subdir() {
        let dir = testutil::scratch_dir("default_install");
        let ctx = crate::arch::test_context(&dir);
        let mut plan = BuildPlan::new();
        plan.add_step("app-sch", Step::new(StepKind::Link)).unwrap();
        DefaultInstall
            .install_module(
                &mut plan,
                &ctx,
                "sch",
                &PathBuf::from("/b/apps/sch.so"),
                "app-sch",
                &["cpu1".to_string()],
            )
            .unwrap();
        let step = plan.get("install-sch-cpu1").unwrap();
        let expect = ctx.staging_dir.join("cpu1").join("cf").join("sch.so");
        assert!(step
            .actions
            .iter()
            .any(|a| matches!(a, Action::Copy { dst, .. } if *dst == expect)));
        assert!(step.deps.contains("app-sch"));
    }

    #[test]
    fn flat_install_skips_subdir() {
        let dir = testutil::scratch_dir("flat_install");
        let ctx = crate::arch::test_context(&dir);
        let mut plan = BuildPlan::new();
        plan.add_step("app-sch", Step::new(StepKind::Link)).unwrap();
        FlatInstall
            .install_module(
                &mut plan,
                &ctx,
                "sch",
                &PathBuf::from("/b/apps/sch.so"),
                "app-sch",
                &["cpu1".to_string()],
            )
            .unwrap();
        let step = plan.get("install-sch-cpu1").unwrap();
        let expect = ctx.staging_dir.join("cpu1").join("sch.so");
        assert!(step
            .actions
            .iter()
            .any(|a| matches!(a, Action::Copy { dst, .. } if *dst == expect)));
    }
}
