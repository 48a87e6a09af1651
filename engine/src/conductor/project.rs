//! Project identity and summary
//!
//! Sessions and todos are keyed by a project id derived from the project root.
//! The summary gives the model a first look at the workspace.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Where the project lives and what it is called in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub root: PathBuf,
    pub id: String,
}

impl ProjectIdentity {
    /// Nearest ancestor of `cwd` containing `.git`, else `cwd` itself
    pub fn discover(cwd: &Path) -> Result<Self> {
        let cwd = cwd
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", cwd.display()))?;
        let root = cwd
            .ancestors()
            .find(|dir| dir.join(".git").exists())
            .unwrap_or(&cwd)
            .to_path_buf();
        Ok(Self::for_root(root))
    }

    /// `<dirname>-<first 12 hex of blake3(root)>`
    pub fn for_root(root: PathBuf) -> Self {
        let dirname = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let hash = blake3::hash(root.to_string_lossy().as_bytes()).to_hex();
        let id = format!("{}-{}", dirname, &hash.as_str()[..12]);
        Self { root, id }
    }
}

/// A brief summary of the project workspace
#[derive(Debug, Clone, Default)]
pub struct ProjectSummary {
    pub root: PathBuf,
    pub top_level_entries: Vec<String>,
    pub languages: Vec<String>,
    pub build_files: Vec<String>,
}

/// Build file and the language it implies
const MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "Rust"),
    ("package.json", "JavaScript/TypeScript"),
    ("tsconfig.json", "JavaScript/TypeScript"),
    ("go.mod", "Go"),
    ("pyproject.toml", "Python"),
    ("requirements.txt", "Python"),
    ("setup.py", "Python"),
    ("pom.xml", "Java"),
    ("build.gradle", "Java/Kotlin"),
    ("Gemfile", "Ruby"),
    ("CMakeLists.txt", "C/C++"),
];

const BUILD_ONLY: &[&str] = &["Makefile", "justfile", "Dockerfile"];

/// Entries listed in the summary at most
const MAX_ENTRIES: usize = 40;

impl ProjectSummary {
    /// Scan the top level of `root`
    pub async fn scan(root: &Path) -> Result<Self> {
        let mut top_level_entries = Vec::new();
        let mut languages = Vec::new();
        let mut build_files = Vec::new();

        let mut entries = fs::read_dir(root)
            .await
            .context("Failed to read workspace directory")?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.starts_with('.') || name == "target" || name == "node_modules" {
                continue;
            }

            if let Some((_, language)) = MARKERS.iter().find(|(marker, _)| *marker == name) {
                languages.push(language.to_string());
                build_files.push(name.clone());
            } else if BUILD_ONLY.contains(&name.as_str()) {
                build_files.push(name.clone());
            }

            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            top_level_entries.push(if is_dir { format!("{}/", name) } else { name });
        }

        top_level_entries.sort();
        languages.sort();
        languages.dedup();
        build_files.sort();

        Ok(Self {
            root: root.to_path_buf(),
            top_level_entries,
            languages,
            build_files,
        })
    }

    /// Format for the system prompt
    pub fn format_for_prompt(&self) -> String {
        let languages = if self.languages.is_empty() {
            "Unknown".to_string()
        } else {
            self.languages.join(", ")
        };
        let build = if self.build_files.is_empty() {
            "none".to_string()
        } else {
            self.build_files.join(", ")
        };
        let mut files: Vec<&str> = self
            .top_level_entries
            .iter()
            .take(MAX_ENTRIES)
            .map(String::as_str)
            .collect();
        if self.top_level_entries.len() > MAX_ENTRIES {
            files.push("...");
        }

        format!(
            "Workspace: {}\nLanguages: {}\nBuild files: {}\nFiles: {}",
            self.root.display(),
            languages,
            build,
            files.join(", ")
        )
    }
}
