// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Table image pipeline.
//!
//! Tables are binary data artifacts compiled from C definition sources
//! and converted by an external tool. A mission may override any table
//! source per target or globally, so source resolution walks a fixed
//! search path and the winner is logged for auditability.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use log::info;

use crate::arch::ArchBuildContext;
use crate::config::ModuleConfig;
use crate::plan::{Action, BuildPlan, CommandSpec, Step, StepKind};

/// Default external converter tool; the `TABLE_CONVERTER` cache entry
/// overrides it.
pub const DEFAULT_CONVERTER: &str = "elf2tbl";

/// Resolves the actual source file for a table, in priority order:
/// per-target mission-defs override, per-target mission-source override,
/// mission-defs override, mission-source override, the path as given,
/// and finally the path relative to the owning module's directory.
pub fn resolve_table_source(
    ctx: &ArchBuildContext,
    module_dir: &Path,
    target: &str,
    table: &str,
) -> Result<PathBuf> {
    let defs = ctx.mission.mission_defs()?;
    let source = ctx.mission.mission_source()?;
    let as_path = PathBuf::from(table);
    let fname = as_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| table.to_string());
    let fname = if fname.ends_with(".c") {
        fname
    } else {
        format!("{}.c", fname)
    };

    let candidates = [
        defs.join("tables").join(format!("{}_{}", target, fname)),
        source.join("tables").join(format!("{}_{}", target, fname)),
        defs.join("tables").join(&fname),
        source.join("tables").join(&fname),
        as_path.clone(),
        module_dir.join(&as_path),
    ];

    for candidate in &candidates {
        if candidate.is_file() {
            info!(
                "table {} for {}: using {}",
                table,
                target,
                candidate.display()
            );
            return Ok(candidate.clone());
        }
    }
    bail!(
        "no source found for table '{}' (target {}); looked in {} and {}",
        table,
        target,
        defs.join("tables").display(),
        source.join("tables").display()
    );
}

fn table_stem(table: &str) -> String {
    Path::new(table)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| table.to_string())
}

/// Declares the compile/convert/install steps for every table of one
/// application, for every destination the application installs to.
/// Returns the umbrella step that completes only when every image has
/// been produced, or `None` when the module declares no tables.
pub fn add_app_tables(
    plan: &mut BuildPlan,
    ctx: &ArchBuildContext,
    module: &ModuleConfig,
    dests: &[String],
) -> Result<Option<String>> {
    if module.tables.is_empty() || dests.is_empty() {
        return Ok(None);
    }

    let converter = ctx
        .mission
        .get("TABLE_CONVERTER")
        .unwrap_or(DEFAULT_CONVERTER)
        .to_string();
    // Table compilation happens outside the per-target build graph, so
    // the target compile flags are fetched explicitly rather than
    // inherited.
    let flags = ctx.table_compile_flags();

    let umbrella_name = format!("tables-{}", module.name);
    let mut umbrella = Step::new(StepKind::Phony);
    let module_includes: Vec<PathBuf> =
        module.includes.iter().map(|i| module.dir.join(i)).collect();

    for dest in dests {
        for table in &module.tables {
            let src = resolve_table_source(ctx, &module.dir, dest, table)?;
            let stem = table_stem(table);
            let out_dir = ctx.table_dir(dest);
            let obj = out_dir.join(format!("{}.o", stem));
            // The image name is derived from the object's base name; the
            // converter is told the output path outright, so the two
            // cannot drift apart.
            let image = out_dir.join(format!("{}.tbl", stem));

            let mut compile = CommandSpec::new(&ctx.cc).args(flags.iter().cloned());
            for d in &ctx.defines {
                compile = compile.arg(format!("-D{}", d));
            }
            for inc in ctx.include_dirs.iter().chain(module_includes.iter()) {
                compile = compile.arg(format!("-I{}", inc.display()));
            }
            compile = compile
                .arg("-c")
                .arg(src.display().to_string())
                .arg("-o")
                .arg(obj.display().to_string());

            let convert = CommandSpec::new(&converter)
                .arg(obj.display().to_string())
                .arg(image.display().to_string());

            let step_name = format!("tbl-{}-{}", stem, dest);
            let step = Step::new(StepKind::Table)
                .action(Action::Mkdir(out_dir.clone()))
                .action(Action::Run(compile))
                .action(Action::Run(convert));
            plan.add_step(&step_name, step)?;

            let staged = ctx
                .staging_dir
                .join(dest)
                .join(ctx.mission.install_subdir());
            let install = Step::new(StepKind::Install)
                .action(Action::Mkdir(staged.clone()))
                .action(Action::Copy {
                    src: image.clone(),
                    dst: staged.join(format!("{}.tbl", stem)),
                })
                .dep(step_name.clone());
            plan.add_step(format!("install-tbl-{}-{}", stem, dest), install)?;

            umbrella.deps.insert(step_name);
        }
    }

    plan.add_step(&umbrella_name, umbrella)?;
    Ok(Some(umbrella_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use indoc::indoc;

    fn table_fixture(test: &str) -> (ArchBuildContext, ModuleConfig) {
        let dir = testutil::scratch_dir(test);
        std::fs::create_dir_all(dir.join("defs/tables")).unwrap();
        std::fs::create_dir_all(dir.join("src/tables")).unwrap();
        std::fs::create_dir_all(dir.join("apps/sch/tables")).unwrap();
        std::fs::write(
            dir.join("apps/sch/module.toml"),
            indoc! {r#"
                name = "sch"
                sources = ["src/sch_app.c"]
                tables = ["tables/housekeeping.c"]
            "#},
        )
        .unwrap();
        let module = ModuleConfig::from_dir(&dir.join("apps/sch")).unwrap();
        let mut ctx = crate::arch::test_context(&dir);
        ctx.mission.set("MISSION_DEFS", dir.join("defs").display().to_string());
        ctx.mission.set("MISSION_SOURCE", dir.join("src").display().to_string());
        (ctx, module)
    }

    #[test]
    fn per_target_defs_override_wins() {
        let (ctx, module) = table_fixture("tbl_override");
        let defs = ctx.mission.mission_defs().unwrap();
        let source = ctx.mission.mission_source().unwrap();
        std::fs::write(defs.join("tables/cpu1_housekeeping.c"), "x").unwrap();
        std::fs::write(defs.join("tables/housekeeping.c"), "x").unwrap();
        std::fs::write(source.join("tables/housekeeping.c"), "x").unwrap();

        let chosen =
            resolve_table_source(&ctx, &module.dir, "cpu1", "tables/housekeeping.c")
                .unwrap();
        assert_eq!(chosen, defs.join("tables/cpu1_housekeeping.c"));

        // Another target without the per-target override falls through to
        // the generic defs override.
        let chosen =
            resolve_table_source(&ctx, &module.dir, "cpu2", "tables/housekeeping.c")
                .unwrap();
        assert_eq!(chosen, defs.join("tables/housekeeping.c"));
    }

    #[test]
    fn search_order_falls_back_to_module_dir() {
        let (ctx, module) = table_fixture("tbl_fallback");
        std::fs::write(module.dir.join("tables/housekeeping.c"), "x").unwrap();
        let chosen =
            resolve_table_source(&ctx, &module.dir, "cpu1", "tables/housekeeping.c")
                .unwrap();
        assert_eq!(chosen, module.dir.join("tables/housekeeping.c"));
    }

    #[test]
    fn missing_table_source_is_fatal() {
        let (ctx, module) = table_fixture("tbl_missing");
        let err =
            resolve_table_source(&ctx, &module.dir, "cpu1", "tables/housekeeping.c")
                .unwrap_err();
        assert!(err.to_string().contains("housekeeping"));
    }

    #[test]
    fn umbrella_depends_on_every_image() {
        let (ctx, module) = table_fixture("tbl_umbrella");
        let defs = ctx.mission.mission_defs().unwrap();
        std::fs::write(defs.join("tables/housekeeping.c"), "x").unwrap();

        let mut plan = BuildPlan::new();
        let dests = vec!["cpu1".to_string(), "cpu2".to_string()];
        let umbrella = add_app_tables(&mut plan, &ctx, &module, &dests)
            .unwrap()
            .unwrap();
        let step = plan.get(&umbrella).unwrap();
        assert!(step.deps.contains("tbl-housekeeping-cpu1"));
        assert!(step.deps.contains("tbl-housekeeping-cpu2"));
        assert!(plan.contains("install-tbl-housekeeping-cpu1"));
        plan.topo_order().unwrap();
    }

    #[test]
    fn no_tables_no_umbrella() {
        let dir = testutil::scratch_dir("tbl_none");
        std::fs::write(
            dir.join("module.toml"),
            indoc! {r#"
                name = "bare"
                sources = ["src/bare.c"]
            "#},
        )
        .unwrap();
        let module = ModuleConfig::from_dir(&dir).unwrap();
        let ctx = crate::arch::test_context(&dir);
        let mut plan = BuildPlan::new();
        let out = add_app_tables(&mut plan, &ctx, &module, &["cpu1".to_string()])
            .unwrap();
        assert!(out.is_none());
        assert!(plan.is_empty());
    }
}
