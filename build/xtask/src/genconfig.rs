// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generated configuration header wrappers.
//!
//! A named profile in the mission definitions directory supplies the
//! actual header content; the generated wrapper just selects it, so the
//! compiled code always includes a stable file name (`osconfig.h`,
//! `cfe_msgids.h`, `cfe_platform_cfg.h`) regardless of which profile won.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

/// Writes `<out_dir>/<header>` including the first existing profile:
/// `<defs>/<selector>_<header>`, falling back to `<defs>/default_<header>`.
pub fn generate_wrapper(
    defs: &Path,
    out_dir: &Path,
    header: &str,
    selector: &str,
) -> Result<PathBuf> {
    let specific = defs.join(format!("{}_{}", selector, header));
    let fallback = defs.join(format!("default_{}", header));
    let chosen = if specific.is_file() {
        &specific
    } else if fallback.is_file() {
        &fallback
    } else {
        bail!(
            "no configuration source for {}: neither {} nor {} exists",
            header,
            specific.display(),
            fallback.display()
        );
    };
    info!("{}: using {}", header, chosen.display());

    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(header);
    let mut out = std::fs::File::create(&out_path)
        .with_context(|| format!("could not create {}", out_path.display()))?;
    writeln!(out, "/* Generated wrapper; do not edit. */")?;
    writeln!(out, "#include \"{}\"", chosen.display())?;
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn specific_profile_wins_over_default() {
        let dir = testutil::scratch_dir("genconfig_specific");
        let defs = dir.join("defs");
        std::fs::create_dir_all(&defs).unwrap();
        std::fs::write(defs.join("cpu1_osconfig.h"), "/* cpu1 */").unwrap();
        std::fs::write(defs.join("default_osconfig.h"), "/* default */").unwrap();

        let out =
            generate_wrapper(&defs, &dir.join("inc"), "osconfig.h", "cpu1").unwrap();
        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.contains("cpu1_osconfig.h"));
    }

    #[test]
    fn falls_back_to_default_profile() {
        let dir = testutil::scratch_dir("genconfig_default");
        let defs = dir.join("defs");
        std::fs::create_dir_all(&defs).unwrap();
        std::fs::write(defs.join("default_cfe_msgids.h"), "x").unwrap();

        let out =
            generate_wrapper(&defs, &dir.join("inc"), "cfe_msgids.h", "cpu9").unwrap();
        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.contains("default_cfe_msgids.h"));
    }

    #[test]
    fn missing_profiles_are_fatal() {
        let dir = testutil::scratch_dir("genconfig_missing");
        let defs = dir.join("defs");
        std::fs::create_dir_all(&defs).unwrap();
        let err = generate_wrapper(&defs, &dir.join("inc"), "osconfig.h", "cpu1")
            .unwrap_err();
        assert!(err.to_string().contains("osconfig.h"));
    }
}
