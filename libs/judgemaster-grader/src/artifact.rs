/// Execution Artifacts
///
/// Every grading run gets its own uniquely named scratch directory holding
/// the submission source (and, for compiled languages, the binary). The
/// directory is owned by exactly one run and is removed when the artifact is
/// dropped, on every exit path: success, fault, timeout, cancellation or
/// panic.
use crate::config::{CommandPaths, LanguageConfig};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Mount point of the artifact directory inside sandbox containers
pub const SANDBOX_DIR: &str = "/sandbox";

const BINARY_NAME: &str = "main";
const STDIN_FILE: &str = ".stdin";

#[derive(Debug)]
pub struct ExecutionArtifact {
    dir: TempDir,
    source_file: String,
}

impl ExecutionArtifact {
    /// Write the submission into a fresh directory under `root` (or the
    /// system temp dir).
    pub async fn materialize(
        root: Option<&Path>,
        language: &LanguageConfig,
        source_code: &str,
    ) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("judgemaster-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let artifact = Self {
            dir,
            source_file: language.source_file.clone(),
        };
        tokio::fs::write(artifact.source_path(), source_code).await?;
        Ok(artifact)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join(&self.source_file)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.dir.path().join(BINARY_NAME)
    }

    /// Paths for commands launched directly on the host
    pub fn host_paths(&self) -> CommandPaths {
        CommandPaths {
            dir: self.dir().display().to_string(),
            source: self.source_path().display().to_string(),
            binary: self.binary_path().display().to_string(),
        }
    }

    /// Paths for commands launched inside a container with the artifact
    /// mounted at [`SANDBOX_DIR`]
    pub fn sandbox_paths(&self) -> CommandPaths {
        CommandPaths {
            dir: SANDBOX_DIR.to_string(),
            source: format!("{}/{}", SANDBOX_DIR, self.source_file),
            binary: format!("{}/{}", SANDBOX_DIR, BINARY_NAME),
        }
    }

    /// Stage a test input as a file, for backends that cannot pipe stdin.
    /// Returns the in-sandbox path.
    pub async fn stage_stdin(&self, input: &str) -> io::Result<String> {
        tokio::fs::write(self.dir.path().join(STDIN_FILE), input).await?;
        Ok(format!("{}/{}", SANDBOX_DIR, STDIN_FILE))
    }

    /// Strip artifact locations from diagnostic text so server paths never
    /// reach a student.
    pub fn sanitize(&self, text: &str) -> String {
        let host = self.dir().display().to_string();
        text.replace(&format!("{}/", host), "")
            .replace(&host, ".")
            .replace(&format!("{}/", SANDBOX_DIR), "")
    }

    /// Remove the directory now, reporting failures. Dropping the artifact
    /// removes it as well, silently.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use judgemaster_common::types::Language;

    fn python() -> LanguageConfig {
        LanguageConfigManager::builtin()
            .get_config(&Language::Python)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_materialize_writes_source() {
        let artifact = ExecutionArtifact::materialize(None, &python(), "print(120)\n")
            .await
            .unwrap();

        assert!(artifact.source_path().ends_with("main.py"));
        let written = tokio::fs::read_to_string(artifact.source_path()).await.unwrap();
        assert_eq!(written, "print(120)\n");
        assert!(artifact
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("judgemaster-"));
    }

    #[tokio::test]
    async fn test_artifacts_are_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let a = ExecutionArtifact::materialize(Some(root.path()), &python(), "a")
            .await
            .unwrap();
        let b = ExecutionArtifact::materialize(Some(root.path()), &python(), "b")
            .await
            .unwrap();
        assert_ne!(a.dir(), b.dir());

        let a_dir = a.dir().to_path_buf();
        let b_dir = b.dir().to_path_buf();
        drop(a);
        b.close().unwrap();

        assert!(!a_dir.exists());
        assert!(!b_dir.exists());
    }

    #[tokio::test]
    async fn test_sanitize_removes_paths() {
        let artifact = ExecutionArtifact::materialize(None, &python(), "raise ValueError")
            .await
            .unwrap();
        let trace = format!(
            "Traceback (most recent call last):\n  File \"{}\", line 1\nValueError",
            artifact.source_path().display()
        );

        let clean = artifact.sanitize(&trace);
        assert!(clean.contains("File \"main.py\", line 1"));
        assert!(!clean.contains(&artifact.dir().display().to_string()));

        assert_eq!(artifact.sanitize("File \"/sandbox/main.py\""), "File \"main.py\"");
    }

    #[tokio::test]
    async fn test_sandbox_paths() {
        let artifact = ExecutionArtifact::materialize(None, &python(), "")
            .await
            .unwrap();
        let paths = artifact.sandbox_paths();
        assert_eq!(paths.dir, "/sandbox");
        assert_eq!(paths.source, "/sandbox/main.py");
        assert_eq!(paths.binary, "/sandbox/main");

        let staged = artifact.stage_stdin("5\n").await.unwrap();
        assert_eq!(staged, "/sandbox/.stdin");
        let on_disk = tokio::fs::read_to_string(artifact.dir().join(".stdin")).await.unwrap();
        assert_eq!(on_disk, "5\n");
    }
}
