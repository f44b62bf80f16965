// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

mod arch;
mod config;
mod exec;
mod genconfig;
mod install;
mod modules;
mod plan;
mod tables;
mod utest;

#[cfg(test)]
mod testutil;

use config::MissionContext;
use plan::BuildPlan;

#[derive(Debug, StructOpt)]
#[structopt(
    max_term_width = 80,
    about = "build orchestration for the mission flight software tree"
)]
enum Xtask {
    /// Builds everything one architecture needs: the OS layer, platform
    /// support, drivers, applications and their table images, and one
    /// linked core executable per target, staged into the install tree.
    Arch {
        /// Path to the mission variable cache written by the outer
        /// configuration pass.
        #[structopt(long, default_value = "mission_vars.cache")]
        cache: PathBuf,

        /// Working directory for this build stage.
        #[structopt(long, default_value = ".")]
        work_dir: PathBuf,

        /// Declare the build graph and print it instead of running it.
        #[structopt(long)]
        plan_only: bool,

        /// Also run the unit test executables registered with the test
        /// runner (requires ENABLE_UNIT_TESTS in the mission cache).
        #[structopt(long)]
        tests: bool,

        /// Name of the target architecture to process.
        arch: String,
    },

    /// Prints the declared build graph for an architecture, in
    /// execution order.
    Plan {
        #[structopt(long, default_value = "mission_vars.cache")]
        cache: PathBuf,

        #[structopt(long, default_value = ".")]
        work_dir: PathBuf,

        arch: String,
    },

    /// Lists the logical targets enumerated by the mission cache.
    Targets {
        #[structopt(long, default_value = "mission_vars.cache")]
        cache: PathBuf,

        #[structopt(long, default_value = ".")]
        work_dir: PathBuf,
    },
}

fn declare(cache: &PathBuf, work_dir: &PathBuf, arch_name: &str) -> Result<BuildPlan> {
    let mission = MissionContext::load(cache, work_dir)?;
    let mut ctx = arch::prepare(mission, arch_name, work_dir)?;
    let mut plan = BuildPlan::new();
    arch::process(&mut plan, &mut ctx)?;
    Ok(plan)
}

fn main() -> Result<()> {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    match Xtask::from_args() {
        Xtask::Arch {
            cache,
            work_dir,
            plan_only,
            tests,
            arch,
        } => {
            let plan = declare(&cache, &work_dir, &arch)?;
            if plan_only {
                exec::print(&plan)?;
            } else {
                exec::run(&plan, tests)?;
            }
        }
        Xtask::Plan {
            cache,
            work_dir,
            arch,
        } => {
            let plan = declare(&cache, &work_dir, &arch)?;
            exec::print(&plan)?;
        }
        Xtask::Targets { cache, work_dir } => {
            let mission = MissionContext::load(&cache, &work_dir)?;
            for target in mission.targets()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    target.name,
                    target.arch,
                    target.platform,
                    target.apps.join(",")
                );
            }
        }
    }

    Ok(())
}
