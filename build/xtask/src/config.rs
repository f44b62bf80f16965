// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mission-level configuration.
//!
//! The outer configuration pass (which enumerates targets and apps for
//! the whole mission) leaves its variables behind in a cache file; each
//! per-architecture build starts by republishing that cache into a
//! `MissionContext`. Individual buildable units carry their own small
//! `module.toml` manifest next to their sources.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

/// Cache values are newline-delimited alternating key/value lines, with
/// literal semicolons escape-protected as `\;` so values that are
/// themselves `;`-separated lists survive the trip through the file.
fn unescape(v: &str) -> String {
    v.replace("\\;", ";")
}

fn escape(v: &str) -> String {
    v.replace(';', "\\;")
}

/// Splits a `;`-separated list value, dropping empty entries so that
/// trailing separators written by the outer pass are harmless.
fn split_list(v: &str) -> Vec<String> {
    v.split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One physical or virtual CPU using this architecture's build output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalTarget {
    pub id: String,
    /// Defaults to `cpu<id>` when the cache does not name the target.
    pub name: String,
    pub arch: String,
    /// Platform-config profile selecting core-executive header content;
    /// defaults to `default`.
    pub platform: String,
    pub apps: Vec<String>,
}

/// The shared mission configuration for one architecture build.
/// Read-only for the lifetime of the build.
#[derive(Clone, Debug, Default)]
pub struct MissionContext {
    vars: IndexMap<String, String>,
    imported: Vec<String>,
}

impl MissionContext {
    /// Loads the serialized variable cache left behind by the outer
    /// configuration pass. `work_dir` is the working directory for this
    /// build stage and must already exist.
    pub fn load(cache: &Path, work_dir: &Path) -> Result<Self> {
        if !work_dir.is_dir() {
            bail!(
                "build stage working directory {} does not exist",
                work_dir.display()
            );
        }
        let contents = std::fs::read_to_string(cache)
            .with_context(|| format!("could not read mission cache {}", cache.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("malformed mission cache {}", cache.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() % 2 != 0 {
            bail!(
                "expected alternating key/value lines, found {} lines",
                lines.len()
            );
        }
        let mut vars = IndexMap::new();
        let mut imported = Vec::new();
        for pair in lines.chunks(2) {
            let key = pair[0].trim().to_string();
            let value = unescape(pair[1]);
            imported.push(key.clone());
            vars.insert(key, value);
        }
        Ok(Self { vars, imported })
    }

    /// Serializes the mapping back into the cache format. Parsing the
    /// result reproduces the mapping exactly, semicolons included.
    pub fn write_cache(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (k, v) in &self.vars {
            out.push_str(k);
            out.push('\n');
            out.push_str(&escape(v));
            out.push('\n');
        }
        std::fs::write(path, out)
            .with_context(|| format!("could not write mission cache {}", path.display()))
    }

    /// The manifest of keys set by the loader, so callers can tell a
    /// loader-provided variable from one set elsewhere.
    pub fn imported_keys(&self) -> &[String] {
        &self.imported
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.vars.contains_key(&key) {
            self.imported.push(key.clone());
        }
        self.vars.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow!("required mission variable '{}' is not set", key))
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// Reads an accumulated-flags variable. An unset variable, or one of
    /// the `NOTFOUND` sentinels a failed lookup may have left behind,
    /// reads as no flags at all.
    pub fn flags(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            None => Vec::new(),
            Some(v) if v == "NOTFOUND" || v.ends_with("-NOTFOUND") => Vec::new(),
            Some(v) => v.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn mission_defs(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.require("MISSION_DEFS")?))
    }

    pub fn mission_source(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.require("MISSION_SOURCE")?))
    }

    /// Staging subdirectory for installed modules and tables.
    pub fn install_subdir(&self) -> &str {
        self.get("INSTALL_SUBDIR").unwrap_or("cf")
    }

    /// Every declared mission dependency, including the OS layer and the
    /// core executive (which the processor handles specially).
    pub fn mission_deps(&self) -> Vec<String> {
        self.get_list("MISSION_DEPS")
    }

    pub fn os_layer(&self) -> &str {
        self.get("MISSION_OSAL").unwrap_or("osal")
    }

    pub fn core_module(&self) -> &str {
        self.get("MISSION_CORE").unwrap_or("cfe-core")
    }

    /// All logical targets enumerated by the mission, across every
    /// architecture.
    pub fn targets(&self) -> Result<Vec<LogicalTarget>> {
        let mut out = Vec::new();
        for id in self.get_list("MISSION_TGTLIST") {
            let arch = self
                .require(&format!("TGT{}_SYSTEM", id))
                .with_context(|| format!("target {} has no architecture", id))?
                .to_string();
            let name = self
                .get(&format!("TGT{}_NAME", id))
                .map(str::to_string)
                .unwrap_or_else(|| format!("cpu{}", id));
            let platform = self
                .get(&format!("TGT{}_PLATFORM", id))
                .unwrap_or("default")
                .to_string();
            let apps = self.get_list(&format!("TGT{}_APPLIST", id));
            out.push(LogicalTarget {
                id,
                name,
                arch,
                platform,
                apps,
            });
        }
        Ok(out)
    }

    /// Narrows the mission target list to one architecture.
    pub fn targets_for(&self, arch: &str) -> Result<Vec<LogicalTarget>> {
        Ok(self
            .targets()?
            .into_iter()
            .filter(|t| t.arch == arch)
            .collect())
    }

    /// Source directory for a named buildable unit. A `<name>_SRCDIR`
    /// cache entry overrides the conventional location under the mission
    /// source tree.
    pub fn module_dir(&self, name: &str) -> Result<PathBuf> {
        if let Some(dir) = self.get(&format!("{}_SRCDIR", name)) {
            return Ok(PathBuf::from(dir));
        }
        Ok(self.mission_source()?.join("apps").join(name))
    }

    /// Source directory for a top-level mission dependency (the OS
    /// layer, the core executive, and friends live directly under the
    /// mission source tree rather than under `apps/`).
    pub fn dep_dir(&self, name: &str) -> Result<PathBuf> {
        if let Some(dir) = self.get(&format!("{}_SRCDIR", name)) {
            return Ok(PathBuf::from(dir));
        }
        Ok(self.mission_source()?.join(name))
    }
}

/// A `RawModuleConfig` is a `module.toml` as deserialized; `ModuleConfig`
/// adds the directory it was loaded from, which everything downstream
/// needs for resolving relative source paths.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawModuleConfig {
    name: String,
    sources: Vec<PathBuf>,
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    includes: Vec<PathBuf>,
    #[serde(default)]
    defines: Vec<String>,
    /// Flags the unit requires every later compilation in this
    /// architecture to carry (the OS layer uses this).
    #[serde(default)]
    exported_defines: Vec<String>,
    #[serde(default)]
    exported_includes: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ModuleConfig {
    pub name: String,
    pub dir: PathBuf,
    pub sources: Vec<PathBuf>,
    pub tables: Vec<String>,
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub exported_defines: Vec<String>,
    pub exported_includes: Vec<PathBuf>,
}

impl ModuleConfig {
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let manifest = dir.join("module.toml");
        let contents = std::fs::read(&manifest)
            .with_context(|| format!("could not read {}", manifest.display()))?;
        let raw: RawModuleConfig = toml::from_slice(&contents)
            .with_context(|| format!("could not parse {}", manifest.display()))?;
        Ok(Self {
            name: raw.name,
            dir: dir.to_path_buf(),
            sources: raw.sources,
            tables: raw.tables,
            includes: raw.includes,
            defines: raw.defines,
            exported_defines: raw.exported_defines,
            exported_includes: raw.exported_includes,
        })
    }

    /// Source paths resolved against the module directory.
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.sources.iter().map(|s| self.dir.join(s)).collect()
    }
}

/// Suggests a close module name when an applist entry matches nothing,
/// for very small edit distances only.
pub fn module_name_suggestion(name: &str, known: &[String]) -> String {
    const MAX_DISTANCE: usize = 3;

    let mut scored: Vec<_> = known
        .iter()
        .filter_map(|s| {
            let distance = strsim::damerau_levenshtein(name, s);
            if distance <= MAX_DISTANCE {
                Some((distance, s))
            } else {
                None
            }
        })
        .collect();
    scored.sort();
    let mut out = format!("'{}' is not a known application or library.", name);
    if let Some((_, s)) = scored.get(0) {
        out.push_str(&format!(" Did you mean '{}'?", s));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn loader_publishes_keys_and_manifest() {
        let ctx =
            MissionContext::parse("MISSION_DEFS\n/opt/defs\nINSTALL_SUBDIR\ncf\n").unwrap();
        assert_eq!(ctx.get("MISSION_DEFS"), Some("/opt/defs"));
        assert_eq!(ctx.install_subdir(), "cf");
        assert_eq!(ctx.imported_keys(), ["MISSION_DEFS", "INSTALL_SUBDIR"]);
    }

    #[test]
    fn cache_roundtrip_preserves_separators() {
        let mut ctx = MissionContext::default();
        ctx.set("MISSION_DEPS", "osal;psp;cfe-core");
        ctx.set("PLAIN", "value");

        let dir = crate::testutil::scratch_dir("cache_roundtrip");
        let path = dir.join("mission_vars.cache");
        ctx.write_cache(&path).unwrap();
        let back = MissionContext::load(&path, &dir).unwrap();

        assert_eq!(back.get("MISSION_DEPS"), Some("osal;psp;cfe-core"));
        assert_eq!(back.get("PLAIN"), Some("value"));
        assert_eq!(back.get_list("MISSION_DEPS"), ["osal", "psp", "cfe-core"]);
    }

    #[test]
    fn escaped_separators_survive_parsing() {
        let ctx = MissionContext::parse("K\na\\;b\\;c\n").unwrap();
        assert_eq!(ctx.get("K"), Some("a;b;c"));
        assert_eq!(ctx.get_list("K"), ["a", "b", "c"]);
    }

    #[test]
    fn missing_work_dir_is_fatal() {
        let dir = crate::testutil::scratch_dir("missing_work_dir");
        let path = dir.join("vars.cache");
        std::fs::write(&path, "K\nv\n").unwrap();
        let err =
            MissionContext::load(&path, &dir.join("no-such-stage")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn odd_line_count_is_diagnosed() {
        let err = MissionContext::parse("KEY\nvalue\nDANGLING\n").unwrap_err();
        assert!(err.to_string().contains("alternating"));
    }

    #[test]
    fn target_defaults() {
        let ctx = MissionContext::parse(concat!(
            "MISSION_TGTLIST\n1\\;2\n",
            "TGT1_SYSTEM\nppc-vxworks\n",
            "TGT2_SYSTEM\nnative\n",
            "TGT2_NAME\nsimhost\n",
            "TGT2_PLATFORM\nsim\n",
            "TGT2_APPLIST\nsch\\;to\n",
        ))
        .unwrap();

        let targets = ctx.targets().unwrap();
        assert_eq!(targets[0].name, "cpu1");
        assert_eq!(targets[0].platform, "default");
        assert!(targets[0].apps.is_empty());
        assert_eq!(targets[1].name, "simhost");
        assert_eq!(targets[1].apps, ["sch", "to"]);

        let narrowed = ctx.targets_for("native").unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].name, "simhost");
    }

    #[test]
    fn flags_guard_notfound_sentinels() {
        let ctx = MissionContext::parse(concat!(
            "A\nNOTFOUND\n",
            "B\nUT_COVERAGE_FLAGS-NOTFOUND\n",
            "C\n-Wall -O2\n",
        ))
        .unwrap();
        assert!(ctx.flags("A").is_empty());
        assert!(ctx.flags("B").is_empty());
        assert!(ctx.flags("UNSET").is_empty());
        assert_eq!(ctx.flags("C"), ["-Wall", "-O2"]);
    }

    #[test]
    fn module_manifest_parses() {
        let dir = crate::testutil::scratch_dir("module_manifest");
        std::fs::write(
            dir.join("module.toml"),
            indoc! {r#"
                name = "sch"
                sources = ["src/sch_app.c", "src/sch_cmds.c"]
                tables = ["sch_def_schtbl"]
                defines = ["SCH_API"]
            "#},
        )
        .unwrap();
        let module = ModuleConfig::from_dir(&dir).unwrap();
        assert_eq!(module.name, "sch");
        assert_eq!(module.sources.len(), 2);
        assert_eq!(module.tables, ["sch_def_schtbl"]);
        assert_eq!(module.source_paths()[0], dir.join("src/sch_app.c"));
    }

    #[test]
    fn suggestion_for_near_miss() {
        let known = vec!["sch".to_string(), "to".to_string()];
        let msg = module_name_suggestion("sc", &known);
        assert!(msg.contains("Did you mean 'sch'?"));
    }
}
