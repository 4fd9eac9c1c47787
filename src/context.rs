//! The persisted conversation context.
//!
//! The transcript is plain text replayed verbatim ahead of each query.  Each turn is a query
//! line followed by a response line, so eviction and undo work in pairs of lines.  The running
//! size of the transcript is tracked as a whitespace word count in the session config.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{ConfigStore, SessionConfig};
use crate::observability::EVICTIONS;
use crate::paths::DataLayout;
use crate::utils::fs::{atomic_write, read_optional};
use crate::utils::time::archive_stamp;
use crate::{Error, Result};

/// Word budget for the transcript plus the pending query.
pub const TOKEN_CEILING: u64 = 2048;

/// Prefix that marks config lines in a snapshot header.
pub const SNAPSHOT_MARKER: &str = "## ";

const SNAPSHOT_HEADER_LINES: usize = 6;

/// Approximates the token count of `text` by counting whitespace-delimited words.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

//////////////////////////////////////////// Snapshot ////////////////////////////////////////////

/// A named, saved config plus transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub config: SessionConfig,
    pub body: String,
}

impl Snapshot {
    /// Parses a snapshot file: six marked config lines, then the raw transcript.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        if lines.len() < SNAPSHOT_HEADER_LINES {
            return Err(Error::config_parse(
                format!(
                    "snapshot header needs {SNAPSHOT_HEADER_LINES} lines, found {}",
                    lines.len()
                ),
                None,
            ));
        }
        let mut header = Vec::with_capacity(SNAPSHOT_HEADER_LINES);
        for (index, line) in lines[..SNAPSHOT_HEADER_LINES].iter().enumerate() {
            let Some(field) = line.strip_prefix(SNAPSHOT_MARKER) else {
                return Err(Error::config_parse(
                    format!("snapshot header line lacks {SNAPSHOT_MARKER:?} marker"),
                    Some(index + 1),
                ));
            };
            header.push(field.trim_end_matches(['\r', '\n']));
        }
        let config = SessionConfig::from_fields(&header)?;
        let body = lines[SNAPSHOT_HEADER_LINES..].concat();
        Ok(Self { config, body })
    }

    /// Renders the snapshot in the format [`Snapshot::parse`] reads.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for line in self.config.record_lines() {
            text.push_str(SNAPSHOT_MARKER);
            text.push_str(&line);
            text.push('\n');
        }
        text.push_str(&self.body);
        text
    }
}

////////////////////////////////////////// ContextBuffer /////////////////////////////////////////

/// Owns the active transcript and the config that describes it.
#[derive(Debug)]
pub struct ContextBuffer {
    layout: DataLayout,
    store: ConfigStore,
    config: SessionConfig,
}

impl ContextBuffer {
    /// Opens the active context, creating the transcript and config record if absent.
    pub fn open(layout: DataLayout, store: ConfigStore) -> Result<Self> {
        let transcript = layout.transcript();
        if !transcript.exists() {
            debug!(path = %transcript.display(), "transcript missing; creating empty context");
            atomic_write(&transcript, b"")?;
        }
        let config = store.read()?;
        Ok(Self {
            layout,
            store,
            config,
        })
    }

    /// The active config.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Persists `config` and makes it active.
    pub fn replace_config(&mut self, config: SessionConfig) -> Result<()> {
        self.store.write(&config)?;
        self.config = config;
        Ok(())
    }

    /// The full transcript text.
    pub fn transcript(&self) -> Result<String> {
        Ok(read_optional(&self.layout.transcript())?.unwrap_or_default())
    }

    fn write_transcript(&self, text: &str) -> Result<()> {
        atomic_write(&self.layout.transcript(), text.as_bytes())
    }

    /// Returns the transcript to replay ahead of `pending_input`.
    ///
    /// When the persisted token count plus the pending input exceeds [`TOKEN_CEILING`], the
    /// oldest pairs of lines are evicted until the remaining transcript fits.  The persisted
    /// token count is left alone; it is corrected on append or reconciliation.
    pub fn read(&self, pending_input: &str) -> Result<String> {
        if pending_input.trim().is_empty() {
            return Err(Error::empty_query(
                "Empty queries cannot be processed. Type something after the '#'.",
            ));
        }
        let transcript = self.transcript()?;
        let pending = word_count(pending_input);
        if self.config.token_count + pending <= TOKEN_CEILING {
            return Ok(transcript);
        }

        let lines: Vec<&str> = transcript.split_inclusive('\n').collect();
        let mut start = 0;
        let mut remaining = word_count(&transcript);
        loop {
            let end = (start + 2).min(lines.len());
            remaining -= lines[start..end]
                .iter()
                .map(|line| word_count(line))
                .sum::<u64>();
            start = end;
            if start >= lines.len() || remaining + pending <= TOKEN_CEILING {
                break;
            }
        }
        let kept = lines[start..].concat();
        self.write_transcript(&kept)?;
        EVICTIONS.click();
        info!(
            evicted_lines = start,
            remaining_words = remaining,
            pending_words = pending,
            "evicted oldest turns to stay under the token ceiling"
        );
        Ok(kept)
    }

    /// Appends a query and its response to the transcript.
    ///
    /// The token count grows only in multi-turn mode.
    pub fn append(&mut self, query: &str, response: &str) -> Result<()> {
        let mut transcript = self.transcript()?;
        for piece in [query, response] {
            transcript.push_str(piece);
            if !piece.ends_with('\n') {
                transcript.push('\n');
            }
        }
        self.write_transcript(&transcript)?;
        if self.config.multi_turn {
            let added = word_count(query) + word_count(response);
            let config = self
                .config
                .clone()
                .with_token_count(self.config.token_count + added);
            self.replace_config(config)?;
            debug!(added, token_count = self.config.token_count, "turn appended");
        } else {
            debug!("turn appended without counting; multi-turn is off");
        }
        Ok(())
    }

    /// Archives the transcript under a timestamped name, then empties it.
    ///
    /// Returns the archive path.
    pub fn clear(&mut self) -> Result<PathBuf> {
        let transcript = self.transcript()?;
        let archive = unique_archive_path(&self.layout.archive_dir(), &archive_stamp());
        atomic_write(&archive, transcript.as_bytes())?;
        self.write_transcript("")?;
        let config = self.config.clone().with_token_count(0);
        self.replace_config(config)?;
        info!(archive = %archive.display(), "context cleared");
        Ok(archive)
    }

    /// Removes the most recent query and response.
    ///
    /// Returns false, leaving everything untouched, when fewer than two lines exist.
    pub fn undo_last(&mut self) -> Result<bool> {
        let transcript = self.transcript()?;
        let lines: Vec<&str> = transcript.split_inclusive('\n').collect();
        if lines.len() < 2 {
            debug!(lines = lines.len(), "nothing to unlearn");
            return Ok(false);
        }
        let kept = lines[..lines.len() - 2].concat();
        self.write_transcript(&kept)?;
        self.token_count()?;
        info!("last interaction unlearned");
        Ok(true)
    }

    /// Recounts the transcript, correcting the persisted count if it drifted.
    pub fn token_count(&mut self) -> Result<u64> {
        let actual = word_count(&self.transcript()?);
        if actual != self.config.token_count {
            warn!(
                persisted = self.config.token_count,
                actual, "token count drifted; correcting"
            );
            let config = self.config.clone().with_token_count(actual);
            self.replace_config(config)?;
        }
        Ok(actual)
    }

    /// Saves the active config and transcript as the snapshot `name`.
    pub fn save_as(&self, name: &str) -> Result<PathBuf> {
        let path = self.layout.snapshot(name)?;
        let snapshot = Snapshot {
            config: self.config.clone(),
            body: self.transcript()?,
        };
        atomic_write(&path, snapshot.render().as_bytes())?;
        info!(path = %path.display(), "context saved");
        Ok(path)
    }

    /// Returns true if the snapshot `name` exists.
    pub fn snapshot_exists(&self, name: &str) -> Result<bool> {
        Ok(self.layout.snapshot(name)?.is_file())
    }

    /// Loads the snapshot `name`, returning false if it does not exist.
    ///
    /// Outside startup, or when no active config exists, the snapshot's config and transcript
    /// both become active.  At startup with an existing config, that config is kept and the
    /// transcript is replaced only when multi-turn mode is off.
    pub fn load_snapshot(&mut self, name: &str, is_startup: bool) -> Result<bool> {
        let path = self.layout.snapshot(name)?;
        let Some(text) = read_optional(&path)? else {
            debug!(path = %path.display(), "snapshot not found");
            return Ok(false);
        };
        let snapshot = Snapshot::parse(&text)?;
        if !is_startup || !self.store.exists() {
            self.replace_config(snapshot.config)?;
        } else {
            self.config = self.store.read()?;
        }
        if !is_startup || !self.config.multi_turn {
            self.write_transcript(&snapshot.body)?;
        }
        info!(path = %path.display(), is_startup, "context loaded");
        Ok(true)
    }
}

fn unique_archive_path(dir: &Path, stamp: &str) -> PathBuf {
    let first = dir.join(format!("{stamp}.txt"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stamp}-{n}.txt")))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

/// Lists saved snapshot names, sorted.
pub fn list_snapshots(layout: &DataLayout) -> Result<Vec<String>> {
    let dir = layout.snapshots_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(format!("cannot list {}", dir.display()), err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stem) = name.strip_suffix(".txt") {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}
