//! Skills: Markdown playbooks that teach the agent tool combinations.
//!
//! A skill is a `SKILL.md` file under `<workspace>/skills/<name>/` (or a
//! built-in directory), with YAML-ish frontmatter:
//!
//! ```text
//! ---
//! name: github
//! description: "Interact with GitHub using the gh CLI"
//! metadata: {"aisbot":{"requires":{"bins":["gh"]},"always":false}}
//! ---
//! ```
//!
//! Two loading tiers: skills marked `always` have their full body injected
//! into every system prompt; the rest only appear in a summary index and
//! the agent loads them on demand with `read_file`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

/// Where a skill was discovered; workspace entries shadow built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkillSource {
    Workspace,
    Builtin,
}

/// A discovered skill.
#[derive(Clone, Debug)]
pub struct SkillInfo {
    pub name: String,
    pub path: PathBuf,
    pub source: SkillSource,
}

/// Parsed frontmatter of interest.
#[derive(Clone, Debug, Default)]
pub struct SkillMeta {
    pub description: Option<String>,
    pub always: bool,
    /// Binaries that must be on PATH.
    pub required_bins: Vec<String>,
    /// Environment variables that must be set.
    pub required_env: Vec<String>,
}

// ─────────────────────────────────────────────
// SkillsLoader
// ─────────────────────────────────────────────

/// Discovers and loads skills from the workspace and an optional built-in
/// directory.
pub struct SkillsLoader {
    workspace_skills: PathBuf,
    builtin_skills: Option<PathBuf>,
}

impl SkillsLoader {
    pub fn new(workspace: &Path, builtin_skills: Option<PathBuf>) -> Self {
        Self {
            workspace_skills: workspace.join("skills"),
            builtin_skills,
        }
    }

    // ────────────── Discovery ──────────────

    /// All discovered skills; workspace names shadow built-in ones.
    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();
        scan_skill_dirs(&self.workspace_skills, SkillSource::Workspace, &mut skills);

        if let Some(builtin) = &self.builtin_skills {
            let mut builtins = Vec::new();
            scan_skill_dirs(builtin, SkillSource::Builtin, &mut builtins);
            for skill in builtins {
                if !skills.iter().any(|s| s.name == skill.name) {
                    skills.push(skill);
                }
            }
        }
        skills
    }

    /// Names of skills whose frontmatter marks them always-active and whose
    /// requirements are satisfied.
    pub fn get_always_skills(&self) -> Vec<String> {
        self.list_skills()
            .into_iter()
            .filter(|skill| {
                let meta = self.skill_meta(&skill.name).unwrap_or_default();
                meta.always && requirements_met(&meta)
            })
            .map(|skill| skill.name)
            .collect()
    }

    // ────────────── Loading ──────────────

    /// Raw body (frontmatter stripped) of one skill.
    pub fn load_skill(&self, name: &str) -> Option<String> {
        let skill = self.find(name)?;
        let raw = std::fs::read_to_string(&skill.path).ok()?;
        Some(strip_frontmatter(&raw).to_string())
    }

    /// Concatenated bodies of the named skills, each under a heading.
    pub fn load_skills_for_context(&self, names: &[String]) -> String {
        let mut parts = Vec::new();
        for name in names {
            if let Some(body) = self.load_skill(name) {
                debug!(skill = %name, "skill loaded into context");
                parts.push(format!("## Skill: {name}\n\n{body}"));
            }
        }
        parts.join("\n\n")
    }

    /// Index of on-demand skills for the system prompt: one `<skill>` line
    /// per entry with its path, summary, and availability.
    pub fn build_skills_summary(&self) -> String {
        let mut lines = Vec::new();
        for skill in self.list_skills() {
            let meta = self.skill_meta(&skill.name).unwrap_or_default();
            if meta.always {
                continue; // full body already present
            }
            let description = meta.description.unwrap_or_default();
            let available = requirements_met_for(&skill, self)
                .then_some("true")
                .unwrap_or("false");
            lines.push(format!(
                "<skill name=\"{}\" path=\"{}\" available=\"{}\">{}</skill>",
                skill.name,
                skill.path.display(),
                available,
                description
            ));
        }
        lines.join("\n")
    }

    /// Parsed frontmatter of one skill.
    pub fn skill_meta(&self, name: &str) -> Option<SkillMeta> {
        let skill = self.find(name)?;
        let raw = std::fs::read_to_string(&skill.path).ok()?;
        Some(parse_frontmatter(&raw))
    }

    fn find(&self, name: &str) -> Option<SkillInfo> {
        self.list_skills().into_iter().find(|s| s.name == name)
    }
}

fn requirements_met_for(skill: &SkillInfo, loader: &SkillsLoader) -> bool {
    loader
        .skill_meta(&skill.name)
        .map(|meta| requirements_met(&meta))
        .unwrap_or(true)
}

fn requirements_met(meta: &SkillMeta) -> bool {
    let bins_ok = meta.required_bins.iter().all(|bin| binary_on_path(bin));
    let env_ok = meta
        .required_env
        .iter()
        .all(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false));
    bins_ok && env_ok
}

fn binary_on_path(bin: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(bin).is_file())
}

fn scan_skill_dirs(root: &Path, source: SkillSource, out: &mut Vec<SkillInfo>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    let mut found: Vec<SkillInfo> = entries
        .flatten()
        .filter_map(|entry| {
            let dir = entry.path();
            let skill_file = dir.join("SKILL.md");
            if dir.is_dir() && skill_file.is_file() {
                Some(SkillInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: skill_file,
                    source,
                })
            } else {
                None
            }
        })
        .collect();
    found.sort_by(|a, b| a.name.cmp(&b.name));
    out.extend(found);
}

// ─────────────────────────────────────────────
// Frontmatter
// ─────────────────────────────────────────────

fn strip_frontmatter(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return raw;
    };
    match rest.find("\n---\n") {
        Some(end) => &rest[end + 5..],
        None => raw,
    }
}

fn parse_frontmatter(raw: &str) -> SkillMeta {
    let mut meta = SkillMeta::default();

    let Some(rest) = raw.strip_prefix("---\n") else {
        return meta;
    };
    let Some(end) = rest.find("\n---\n") else {
        return meta;
    };

    for line in rest[..end].lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "description" => {
                meta.description = Some(value.trim_matches('"').to_string());
            }
            "metadata" => {
                if let Ok(parsed) = serde_json::from_str::<Value>(value) {
                    apply_metadata(&mut meta, &parsed);
                }
            }
            _ => {}
        }
    }
    meta
}

fn apply_metadata(meta: &mut SkillMeta, parsed: &Value) {
    let Some(inner) = parsed.get("aisbot") else {
        return;
    };
    meta.always = inner.get("always").and_then(Value::as_bool).unwrap_or(false);
    if let Some(requires) = inner.get("requires") {
        meta.required_bins = string_list(requires.get("bins"));
        meta.required_env = string_list(requires.get("env"));
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, name: &str, frontmatter: &str, body: &str) {
        let dir = root.join("skills").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), format!("{frontmatter}{body}")).unwrap();
    }

    const PLAIN: &str = "---\nname: plain\ndescription: \"A plain skill\"\n---\n";
    const ALWAYS: &str =
        "---\nname: core\ndescription: \"Core rules\"\nmetadata: {\"aisbot\":{\"always\":true}}\n---\n";

    #[test]
    fn discovers_workspace_skills_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "zeta", PLAIN, "# Z");
        write_skill(dir.path(), "alpha", PLAIN, "# A");

        let loader = SkillsLoader::new(dir.path(), None);
        let names: Vec<String> = loader.list_skills().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn workspace_shadows_builtin() {
        let workspace = tempfile::tempdir().unwrap();
        let builtin = tempfile::tempdir().unwrap();
        write_skill(workspace.path(), "github", PLAIN, "# workspace version");

        let builtin_skills = builtin.path().join("skills");
        std::fs::create_dir_all(builtin_skills.join("github")).unwrap();
        std::fs::write(
            builtin_skills.join("github").join("SKILL.md"),
            format!("{PLAIN}# builtin version"),
        )
        .unwrap();
        std::fs::create_dir_all(builtin_skills.join("weather")).unwrap();
        std::fs::write(
            builtin_skills.join("weather").join("SKILL.md"),
            format!("{PLAIN}# weather"),
        )
        .unwrap();

        let loader = SkillsLoader::new(workspace.path(), Some(builtin_skills));
        let skills = loader.list_skills();
        assert_eq!(skills.len(), 2);

        let github = skills.iter().find(|s| s.name == "github").unwrap();
        assert_eq!(github.source, SkillSource::Workspace);
        assert!(loader
            .load_skill("github")
            .unwrap()
            .contains("workspace version"));
    }

    #[test]
    fn always_skills_are_split_from_the_index() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "core", ALWAYS, "# Core\nAlways on.");
        write_skill(dir.path(), "plain", PLAIN, "# Plain");

        let loader = SkillsLoader::new(dir.path(), None);
        assert_eq!(loader.get_always_skills(), vec!["core"]);

        let summary = loader.build_skills_summary();
        assert!(summary.contains("name=\"plain\""));
        assert!(summary.contains("A plain skill"));
        assert!(!summary.contains("name=\"core\""));
    }

    #[test]
    fn load_skills_for_context_strips_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "core", ALWAYS, "# Core\nAlways on.");

        let loader = SkillsLoader::new(dir.path(), None);
        let content = loader.load_skills_for_context(&["core".to_string()]);
        assert!(content.contains("## Skill: core"));
        assert!(content.contains("Always on."));
        assert!(!content.contains("metadata:"));
    }

    #[test]
    fn missing_binary_marks_skill_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let frontmatter = "---\nname: exotic\ndescription: \"Needs a tool\"\n\
             metadata: {\"aisbot\":{\"requires\":{\"bins\":[\"definitely-not-a-real-binary\"]}}}\n---\n";
        write_skill(dir.path(), "exotic", frontmatter, "# Exotic");

        let loader = SkillsLoader::new(dir.path(), None);
        let summary = loader.build_skills_summary();
        assert!(summary.contains("available=\"false\""));
    }

    #[test]
    fn common_binary_marks_skill_available() {
        let dir = tempfile::tempdir().unwrap();
        let frontmatter = "---\nname: shelly\ndescription: \"Uses sh\"\n\
             metadata: {\"aisbot\":{\"requires\":{\"bins\":[\"sh\"]}}}\n---\n";
        write_skill(dir.path(), "shelly", frontmatter, "# Shelly");

        let loader = SkillsLoader::new(dir.path(), None);
        let summary = loader.build_skills_summary();
        assert!(summary.contains("available=\"true\""));
    }

    #[test]
    fn no_skills_dir_means_empty_everything() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillsLoader::new(dir.path(), None);
        assert!(loader.list_skills().is_empty());
        assert!(loader.get_always_skills().is_empty());
        assert_eq!(loader.build_skills_summary(), "");
    }

    #[test]
    fn frontmatter_parsing_is_lenient() {
        assert_eq!(strip_frontmatter("no frontmatter"), "no frontmatter");
        let meta = parse_frontmatter("just a body\nwith lines\n");
        assert!(!meta.always);
        assert!(meta.description.is_none());
    }
}
