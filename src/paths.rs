//! On-disk layout of the nl2sh data directory.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "NL2SH_HOME";

const TRANSCRIPT_FILE: &str = "current_context.txt";
const CONFIG_FILE: &str = "current_context.config";
const SNAPSHOTS_DIR: &str = "contexts";
const ARCHIVE_DIR: &str = "deleted";
const SNAPSHOT_EXTENSION: &str = ".txt";

/// Paths of every file nl2sh reads or writes under one data directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the data directory from an explicit override, then `NL2SH_HOME`, then the
    /// platform data directory.
    pub fn from_env(explicit: Option<PathBuf>) -> Result<Self> {
        let env = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        Self::resolve(explicit, env, dirs::data_dir())
    }

    fn resolve(
        explicit: Option<PathBuf>,
        env: Option<PathBuf>,
        platform: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(root) = explicit.or(env.filter(|p| !p.as_os_str().is_empty())) {
            return Ok(Self::new(root));
        }
        match platform {
            Some(dir) => Ok(Self::new(dir.join("nl2sh"))),
            None => Err(Error::config_missing(
                format!("no data directory; pass --data-dir or set {DATA_DIR_ENV}"),
                None,
            )),
        }
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The active transcript.
    pub fn transcript(&self) -> PathBuf {
        self.root.join(TRANSCRIPT_FILE)
    }

    /// The active session config record.
    pub fn config_record(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Directory holding named snapshots.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Directory holding transcripts archived by a clear.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    /// Path of the snapshot called `name`, adding `.txt` when absent.
    ///
    /// Names must be a single plain file name so a snapshot can never escape the snapshots
    /// directory.
    pub fn snapshot(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(Error::validation(
                    format!("invalid context name {name:?}"),
                    Some("name".to_string()),
                ));
            }
        }
        let file_name = if name.ends_with(SNAPSHOT_EXTENSION) {
            name.to_string()
        } else {
            format!("{name}{SNAPSHOT_EXTENSION}")
        };
        Ok(self.snapshots_dir().join(file_name))
    }
}

/// Default location of the JSON credentials file.
pub fn default_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".openai").join("codex-cli.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_file_names() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.transcript(), PathBuf::from("/data/current_context.txt"));
        assert_eq!(
            layout.config_record(),
            PathBuf::from("/data/current_context.config")
        );
        assert_eq!(layout.archive_dir(), PathBuf::from("/data/deleted"));
    }

    #[test]
    fn snapshot_names_get_extension_once() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.snapshot("bash-context").unwrap(),
            PathBuf::from("/data/contexts/bash-context.txt")
        );
        assert_eq!(
            layout.snapshot("notes.txt").unwrap(),
            PathBuf::from("/data/contexts/notes.txt")
        );
    }

    #[test]
    fn snapshot_names_cannot_escape() {
        let layout = DataLayout::new("/data");
        for bad in ["", "  ", "../secrets", "a/b", "/etc/passwd", ".."] {
            let err = layout.snapshot(bad).unwrap_err();
            assert!(err.is_validation(), "{bad:?} accepted");
        }
    }

    #[test]
    fn resolve_precedence() {
        let explicit = DataLayout::resolve(
            Some(PathBuf::from("/explicit")),
            Some(PathBuf::from("/env")),
            Some(PathBuf::from("/platform")),
        )
        .unwrap();
        assert_eq!(explicit.root(), Path::new("/explicit"));

        let env = DataLayout::resolve(
            None,
            Some(PathBuf::from("/env")),
            Some(PathBuf::from("/platform")),
        )
        .unwrap();
        assert_eq!(env.root(), Path::new("/env"));

        let platform =
            DataLayout::resolve(None, Some(PathBuf::new()), Some(PathBuf::from("/platform")))
                .unwrap();
        assert_eq!(platform.root(), Path::new("/platform/nl2sh"));

        assert!(
            DataLayout::resolve(None, None, None)
                .unwrap_err()
                .is_config_missing()
        );
    }
}
