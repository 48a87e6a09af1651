use sdk::errors::EngineError;
use std::path::{Component, Path, PathBuf};

/// Secrets no tool may read or write, matched as trailing component runs
const DENIED: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".env",
    ".aws/credentials",
    ".config/gcloud",
    ".kube/config",
    ".npmrc",
    ".pypirc",
    ".netrc",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
];

/// Confines tool paths to the project workspace.
///
/// A path is rejected when any run of its components matches a denied entry,
/// both as written and after symlinks are resolved, or when the resolved path
/// escapes the workspace root. Paths that do not exist yet resolve through
/// their nearest existing ancestor.
#[derive(Debug, Clone)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    denied: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Fails with `PathCanonicalization` when the workspace is missing.
    pub fn new(workspace: PathBuf) -> Result<Self, EngineError> {
        let workspace = canonical(&workspace)?;
        Ok(Self {
            workspace,
            denied: DENIED.iter().map(PathBuf::from).collect(),
        })
    }

    /// Resolve a tool-supplied path, relative to the workspace or absolute.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, EngineError> {
        let raw = Path::new(raw.trim());
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.workspace.join(raw)
        };

        if joined.exists() {
            self.validate_path(&joined)
        } else {
            self.validate_new_path(&joined)
        }
    }

    /// Check an existing path and return its canonical form.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        self.check_denied(path)?;
        let resolved = canonical(path)?;
        // A symlink may point somewhere the written path did not mention.
        self.check_denied(&resolved)?;

        if !resolved.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(resolved));
        }
        Ok(resolved)
    }

    /// Check a path that does not exist yet.
    ///
    /// The missing tail is re-attached to the canonical nearest ancestor and
    /// may not contain `..`.
    pub fn validate_new_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        self.check_denied(path)?;

        let escapes = || EngineError::PathOutsideWorkspace(path.to_path_buf());
        let mut ancestor = path;
        let mut missing = Vec::new();
        while !ancestor.exists() {
            missing.push(ancestor.file_name().ok_or_else(escapes)?.to_os_string());
            ancestor = ancestor.parent().ok_or_else(escapes)?;
        }

        if path
            .components()
            .skip(ancestor.components().count())
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(escapes());
        }

        let mut resolved = self.validate_path(ancestor)?;
        resolved.extend(missing.into_iter().rev());
        self.check_denied(&resolved)?;
        Ok(resolved)
    }

    fn check_denied(&self, path: &Path) -> Result<(), EngineError> {
        if self.is_denied(path) {
            Err(EngineError::PathDenied(path.to_path_buf()))
        } else {
            Ok(())
        }
    }

    /// True when some window of `path`'s components equals a denied entry,
    /// so `~/.ssh/id_rsa`, `repo/.env` and `.aws/credentials` all match.
    fn is_denied(&self, path: &Path) -> bool {
        let parts: Vec<Component> = path.components().collect();
        self.denied.iter().any(|denied| {
            let needle: Vec<Component> = denied.components().collect();
            parts.windows(needle.len()).any(|window| window == needle.as_slice())
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Workspace-relative display form of a resolved path.
    pub fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

fn canonical(path: &Path) -> Result<PathBuf, EngineError> {
    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn guard(temp: &TempDir) -> FileSystemGuard {
        FileSystemGuard::new(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_missing_workspace_is_an_error() {
        let result = FileSystemGuard::new(PathBuf::from("/definitely/not/a/workspace"));
        assert!(matches!(
            result,
            Err(EngineError::PathCanonicalization(_, _))
        ));
    }

    #[test]
    fn test_deny_list_before_canonicalization() {
        let temp = TempDir::new().unwrap();
        let result = guard(&temp).resolve(".ssh/config");
        assert!(matches!(result, Err(EngineError::PathDenied(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_deny_list_after_canonicalization() {
        let temp = TempDir::new().unwrap();
        let ssh_dir = temp.path().join(".ssh");
        fs::create_dir(&ssh_dir).unwrap();
        std::os::unix::fs::symlink(&ssh_dir, temp.path().join("safe_link")).unwrap();

        let result = guard(&temp).resolve("safe_link");
        assert!(matches!(result, Err(EngineError::PathDenied(_))));
    }

    #[test]
    fn test_existing_file_resolves_inside_workspace() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("main.rs"), "fn main() {}").unwrap();
        let guard = guard(&temp);

        let resolved = guard.resolve("main.rs").unwrap();
        assert!(resolved.starts_with(guard.workspace()));
        assert_eq!(guard.display(&resolved), "main.rs");
    }

    #[test]
    fn test_new_file_in_new_directory_resolves() {
        let temp = TempDir::new().unwrap();
        let guard = guard(&temp);

        let resolved = guard.resolve("src/auth/jwt.rs").unwrap();
        assert!(resolved.starts_with(guard.workspace()));
        assert!(resolved.ends_with("src/auth/jwt.rs"));
    }

    #[test]
    fn test_traversal_out_of_workspace_is_rejected() {
        let temp = TempDir::new().unwrap();
        let guard = guard(&temp);

        assert!(guard.resolve("../outside.txt").is_err());
        assert!(guard.resolve("missing/../../outside.txt").is_err());
        assert!(matches!(
            guard.resolve("/etc/hostname-that-does-not-exist"),
            Err(EngineError::PathOutsideWorkspace(_))
        ));
    }

    #[test]
    fn test_denied_entries_match_component_runs() {
        let temp = TempDir::new().unwrap();
        let guard = guard(&temp);

        assert!(guard.is_denied(Path::new("/home/dev/.aws/credentials")));
        assert!(guard.is_denied(Path::new("keys/id_rsa")));
        assert!(!guard.is_denied(Path::new("docs/aws/credentials.md")));
        assert!(!guard.is_denied(Path::new("src/environment.rs")));
    }

    #[test]
    fn test_new_denied_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let result = guard(&temp).resolve("config/.env");
        assert!(matches!(result, Err(EngineError::PathDenied(_))));
    }
}
