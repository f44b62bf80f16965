// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-architecture build driver.
//!
//! `prepare` validates the architecture's toolchain selection and
//! narrows the mission target list; `process` declares the whole build
//! graph for the architecture, in an order that matters: the OS layer
//! first (its exported flags feed everything after it), then auxiliary
//! dependencies, drivers, applications, and finally one core executive
//! per distinct (architecture, platform-config) pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use crate::config::{
    module_name_suggestion, LogicalTarget, MissionContext, ModuleConfig,
};
use crate::genconfig;
use crate::install;
use crate::modules::{self, link_mode_for};
use crate::plan::{Action, BuildPlan, CommandSpec, Step, StepKind};
use crate::tables;
use crate::utest;

/// Everything an architecture build carries around: the read-only
/// mission context plus the per-architecture state that used to live in
/// ambient variables. Threaded explicitly through every component.
#[derive(Debug)]
pub struct ArchBuildContext {
    pub mission: MissionContext,
    pub arch: String,
    /// Only the logical targets referencing this architecture.
    pub targets: Vec<LogicalTarget>,
    pub cc: String,
    pub ar: String,
    pub ostype: String,
    pub psp: String,
    pub compile_flags: Vec<String>,
    pub defines: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    pub build_dir: PathBuf,
    pub staging_dir: PathBuf,
    /// Per-application install destination lists, keyed by app name,
    /// accumulated from every target's applist.
    pub app_installs: BTreeMap<String, Vec<String>>,
}

impl ArchBuildContext {
    pub fn obj_dir(&self, module: &str) -> PathBuf {
        self.build_dir.join("obj").join(module)
    }

    pub fn lib_path(&self, module: &str) -> PathBuf {
        self.build_dir.join(format!("lib{}.a", module))
    }

    pub fn ut_lib_path(&self, module: &str) -> PathBuf {
        self.build_dir.join("ut").join(format!("lib{}-ut.a", module))
    }

    pub fn app_path(&self, module: &str) -> PathBuf {
        self.build_dir.join("apps").join(format!("{}.so", module))
    }

    pub fn table_dir(&self, dest: &str) -> PathBuf {
        self.build_dir.join("tables").join(dest)
    }

    /// Include path shared by every PSP driver module.
    pub fn psp_include_dir(&self) -> Result<PathBuf> {
        Ok(self.mission.mission_source()?.join("psp").join("inc"))
    }

    /// Unit-test harness support directory (entry point and headers).
    pub fn harness_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.mission.get("UT_SUPPORT_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(self.mission.mission_source()?.join("ut_assert"))
    }

    /// Compile flags for table sources. Tables build outside the normal
    /// per-target graph, so the flags are fetched from the mission
    /// context on demand instead of being inherited.
    pub fn table_compile_flags(&self) -> Vec<String> {
        self.mission
            .flags(&format!("ARCH_{}_COMPILE_FLAGS", self.arch))
    }
}

/// Host defaults for native builds. Cross builds get no defaults: the
/// toolchain description must name the selectors itself.
fn native_selectors() -> Result<(&'static str, &'static str)> {
    match std::env::consts::OS {
        "linux" | "macos" => Ok(("posix", "pc-linux")),
        other => bail!(
            "no default OS-type/PSP selection for host system '{}'",
            other
        ),
    }
}

/// Validates and defaults this architecture's configuration, generates
/// its config header wrappers, and narrows the target list.
pub fn prepare(
    mission: MissionContext,
    arch: &str,
    work_dir: &Path,
) -> Result<ArchBuildContext> {
    let targets = mission.targets_for(arch)?;
    let build_dir = work_dir.join(arch);
    let staging_dir = mission
        .get("MISSION_STAGING")
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join("staging"));

    let generated_inc = build_dir.join("inc");
    if !targets.is_empty() {
        let defs = mission.mission_defs()?;
        genconfig::generate_wrapper(&defs, &generated_inc, "osconfig.h", arch)?;
    }

    let mut defines = Vec::new();
    if let Some(sim) = mission.get("SIMULATION") {
        // Not real hardware; let the code know.
        defines.push(format!("SIMULATION={}", sim));
    }

    let cross = arch != "native";
    let (ostype, psp) = if cross {
        let ostype = mission
            .get(&format!("ARCH_{}_OSTYPE", arch))
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "cross build for '{}': the toolchain must set ARCH_{}_OSTYPE",
                    arch, arch
                )
            })?;
        let psp = mission
            .get(&format!("ARCH_{}_PSP", arch))
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "cross build for '{}': the toolchain must set ARCH_{}_PSP",
                    arch, arch
                )
            })?;
        (ostype, psp)
    } else {
        let (default_os, default_psp) = native_selectors()?;
        (
            mission
                .get(&format!("ARCH_{}_OSTYPE", arch))
                .unwrap_or(default_os)
                .to_string(),
            mission
                .get(&format!("ARCH_{}_PSP", arch))
                .unwrap_or(default_psp)
                .to_string(),
        )
    };

    let cc = if cross {
        mission
            .require(&format!("ARCH_{}_CC", arch))
            .with_context(|| {
                format!("cross build for '{}' has no compiler", arch)
            })?
            .to_string()
    } else {
        mission
            .get(&format!("ARCH_{}_CC", arch))
            .unwrap_or("cc")
            .to_string()
    };
    let ar = mission
        .get(&format!("ARCH_{}_AR", arch))
        .unwrap_or("ar")
        .to_string();

    let compile_flags = mission.flags(&format!("ARCH_{}_COMPILE_FLAGS", arch));

    info!("architecture {}: OS type {}, PSP {}", arch, ostype, psp);

    Ok(ArchBuildContext {
        mission,
        arch: arch.to_string(),
        targets,
        cc,
        ar,
        ostype,
        psp,
        compile_flags,
        defines,
        include_dirs: vec![generated_inc],
        build_dir,
        staging_dir,
        app_installs: BTreeMap::new(),
    })
}

fn load_app_config(ctx: &ArchBuildContext, app: &str) -> Result<ModuleConfig> {
    let dir = ctx.mission.module_dir(app)?;
    if !dir.join("module.toml").is_file() {
        let known = known_apps(ctx);
        bail!("{}", module_name_suggestion(app, &known));
    }
    ModuleConfig::from_dir(&dir)
}

fn known_apps(ctx: &ArchBuildContext) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(source) = ctx.mission.mission_source() {
        if let Ok(entries) = std::fs::read_dir(source.join("apps")) {
            for entry in entries.flatten() {
                if entry.path().join("module.toml").is_file() {
                    out.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
    }
    out.sort();
    out
}

/// Declares the complete build graph for one architecture.
pub fn process(plan: &mut BuildPlan, ctx: &mut ArchBuildContext) -> Result<()> {
    // An architecture no target references builds nothing at all.
    if ctx.targets.is_empty() {
        info!("architecture {}: no targets, skipping", ctx.arch);
        return Ok(());
    }

    let names: Vec<&str> =
        ctx.targets.iter().map(|t| t.name.as_str()).collect();
    info!("architecture {}: targets {}", ctx.arch, names.join(", "));

    let hooks = install::hooks_for(ctx)?;
    let os_layer = ctx.mission.os_layer().to_string();
    let core_module = ctx.mission.core_module().to_string();

    // The OS layer goes first: its exported defines and include paths
    // apply to every compilation that follows.
    let os_cfg = ModuleConfig::from_dir(&ctx.mission.dep_dir(&os_layer)?)
        .with_context(|| format!("could not load OS layer '{}'", os_layer))?;
    modules::add_app_module(
        plan,
        ctx,
        &os_cfg,
        modules::LinkMode::Static,
        &[],
        &[],
        &*hooks,
    )?;
    ctx.defines.extend(os_cfg.exported_defines.iter().cloned());
    ctx.include_dirs
        .extend(os_cfg.exported_includes.iter().map(|i| os_cfg.dir.join(i)));

    // Auxiliary mission dependencies; the OS layer is done and the core
    // executive is built per platform config later.
    for dep in ctx.mission.mission_deps() {
        if dep == os_layer || dep == core_module {
            continue;
        }
        let cfg = ModuleConfig::from_dir(&ctx.mission.dep_dir(&dep)?)
            .with_context(|| format!("could not load mission dependency '{}'", dep))?;
        modules::add_app_module(
            plan,
            ctx,
            &cfg,
            modules::LinkMode::Static,
            &[],
            &[],
            &*hooks,
        )?;
    }

    // PSP driver modules.
    for driver in ctx.mission.get_list("PSP_MODULE_LIST") {
        let dir = match ctx.mission.get(&format!("{}_SRCDIR", driver)) {
            Some(d) => PathBuf::from(d),
            None => ctx
                .mission
                .mission_source()?
                .join("psp")
                .join("modules")
                .join(&driver),
        };
        let cfg = ModuleConfig::from_dir(&dir)
            .with_context(|| format!("could not load PSP module '{}'", driver))?;
        modules::add_driver_module(plan, ctx, &cfg)?;
        info!("PSP module {}", driver);
    }

    // Applications that are only ever statically linked.
    for app in ctx.mission.get_list("MISSION_STATIC_APPLIST") {
        let cfg = load_app_config(ctx, &app)?;
        modules::add_app_module(
            plan,
            ctx,
            &cfg,
            modules::LinkMode::Static,
            &[],
            &[],
            &*hooks,
        )?;
    }

    // The platform support package itself.
    let psp_dir = ctx.mission.mission_source()?.join("psp").join(&ctx.psp);
    let psp_cfg = ModuleConfig::from_dir(&psp_dir)
        .with_context(|| format!("could not load PSP '{}'", ctx.psp))?;
    let psp_name = psp_cfg.name.clone();
    modules::add_app_module(
        plan,
        ctx,
        &psp_cfg,
        modules::LinkMode::Static,
        &[],
        &[],
        &*hooks,
    )?;

    // Per-application install destination lists: one app may be staged
    // to any number of targets.
    for target in &ctx.targets {
        for app in &target.apps {
            ctx.app_installs
                .entry(app.clone())
                .or_default()
                .push(target.name.clone());
        }
    }

    // Every loadable app in this architecture links against the same
    // designated core variant, even when targets use several platform
    // configs. Known limitation.
    let core_platform = ctx
        .mission
        .get("MISSION_CORE_PLATFORM")
        .unwrap_or(&ctx.targets[0].platform)
        .to_string();
    if !ctx.targets.iter().any(|t| t.platform == core_platform) {
        bail!(
            "designated core platform '{}' is not used by any {} target",
            core_platform,
            ctx.arch
        );
    }
    let core_lib = format!("core-{}", core_platform);

    let installs = ctx.app_installs.clone();
    for (app, dests) in &installs {
        let cfg = load_app_config(ctx, app)?;
        let app_step = modules::add_app_module(
            plan,
            ctx,
            &cfg,
            link_mode_for(dests),
            &[os_layer.as_str(), psp_name.as_str(), core_lib.as_str()],
            dests,
            &*hooks,
        )?;
        let umbrella = tables::add_app_tables(plan, ctx, &cfg, dests)?;
        // The app is complete only once all of its table images are.
        let mut rollup = Step::new(StepKind::Phony).dep(app_step);
        if let Some(umbrella) = umbrella {
            rollup = rollup.dep(umbrella);
        }
        plan.add_step(app.clone(), rollup)?;
    }

    // The core test-stub library rides along when unit testing is on.
    if matches!(
        ctx.mission.get("ENABLE_UNIT_TESTS"),
        Some("true") | Some("TRUE") | Some("1")
    ) {
        let stub_dir = ctx.mission.dep_dir(&core_module)?.join("ut-stubs");
        let stub_cfg = ModuleConfig::from_dir(&stub_dir)
            .context("unit testing is enabled but the core stub library is missing")?;
        modules::add_unit_test_lib(plan, ctx, &stub_cfg)?;
        for app in installs.keys() {
            let cfg = load_app_config(ctx, app)?;
            utest::add_unit_test_exe(
                plan,
                ctx,
                &format!("{}-ut", app),
                &cfg,
                &[stub_cfg.name.as_str()],
            )?;
        }
    }

    // One core executive per distinct (architecture, platform-config)
    // pair, shared by every target using that pair.
    let core_cfg = ModuleConfig::from_dir(&ctx.mission.dep_dir(&core_module)?)
        .with_context(|| format!("could not load core executive '{}'", core_module))?;
    let mut built: BTreeMap<String, String> = BTreeMap::new();
    let targets = ctx.targets.clone();
    for target in &targets {
        let lib_step = match built.get(&target.platform) {
            Some(step) => step.clone(),
            None => {
                let inc = ctx.build_dir.join("inc").join(&target.platform);
                let defs = ctx.mission.mission_defs()?;
                for header in ["cfe_msgids.h", "cfe_platform_cfg.h"] {
                    genconfig::generate_wrapper(
                        &defs,
                        &inc,
                        header,
                        &target.platform,
                    )?;
                }
                let step = modules::add_core_library(
                    plan,
                    ctx,
                    &core_cfg,
                    &target.platform,
                    &inc,
                )?;
                built.insert(target.platform.clone(), step.clone());
                step
            }
        };

        let exe = ctx
            .build_dir
            .join(&target.name)
            .join(format!("core-{}", target.name));
        let mut link = CommandSpec::new(&ctx.cc)
            .args(ctx.compile_flags.iter().cloned())
            .arg("-o")
            .arg(exe.display().to_string())
            .arg(
                ctx.lib_path(&format!("core-{}", target.platform))
                    .display()
                    .to_string(),
            )
            .arg(ctx.lib_path(&psp_name).display().to_string())
            .arg(ctx.lib_path(&os_layer).display().to_string());
        if let Some(extra) = ctx.mission.get(&format!("ARCH_{}_LINK_FLAGS", ctx.arch))
        {
            link = link.args(extra.split_whitespace().map(str::to_string));
        }
        let exe_step = format!("exe-{}", target.name);
        let step = Step::new(StepKind::Link)
            .action(Action::Mkdir(
                exe.parent().expect("exe dir").to_path_buf(),
            ))
            .action(Action::Run(link))
            .dep(lib_step)
            .dep(format!("lib-{}", psp_name))
            .dep(format!("lib-{}", os_layer));
        plan.add_step(&exe_step, step)?;

        hooks.install_executable(plan, ctx, target, &exe, &exe_step)?;
    }

    Ok(())
}

/// A minimal context for unit tests elsewhere in this crate.
#[cfg(test)]
pub fn test_context(dir: &Path) -> ArchBuildContext {
    let mut mission = MissionContext::default();
    mission.set("MISSION_DEFS", dir.join("defs").display().to_string());
    mission.set("MISSION_SOURCE", dir.join("src").display().to_string());
    ArchBuildContext {
        mission,
        arch: "native".to_string(),
        targets: Vec::new(),
        cc: "cc".to_string(),
        ar: "ar".to_string(),
        ostype: "posix".to_string(),
        psp: "pc-linux".to_string(),
        compile_flags: Vec::new(),
        defines: Vec::new(),
        include_dirs: Vec::new(),
        build_dir: dir.join("build"),
        staging_dir: dir.join("staging"),
        app_installs: BTreeMap::new(),
    }
}
