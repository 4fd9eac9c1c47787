//! Session configuration and its persisted record.
//!
//! The record is six `key: value` lines in a fixed order.  Parsing is strictly positional: a
//! record with a field out of place, a missing field, or an extra line is rejected as a whole.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::utils::fs::{atomic_write, read_optional};
use crate::{Error, Result};

/// Default sampling temperature for a fresh session.
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// Default response token limit for a fresh session.
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Highest temperature the completion service accepts.
pub const MAX_TEMPERATURE: f32 = 2.0;

const FIELD_ORDER: [&str; 6] = [
    "model",
    "temperature",
    "max_tokens",
    "shell",
    "multi_turn",
    "token_count",
];

//////////////////////////////////////////// ShellType ///////////////////////////////////////////

/// The shells nl2sh knows how to write commands for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShellType {
    Bash,
    Zsh,
    PowerShell,
    #[default]
    Unknown,
}

impl ShellType {
    /// The name persisted in the config record.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellType::Bash => "bash",
            ShellType::Zsh => "zsh",
            ShellType::PowerShell => "powershell",
            ShellType::Unknown => "unknown",
        }
    }

    /// Text placed ahead of the transcript so the model answers in the right dialect.
    pub fn preamble(&self) -> &'static str {
        match self {
            ShellType::Bash => "#!/bin/bash\n\n",
            ShellType::Zsh => "#!/bin/zsh\n\n",
            ShellType::PowerShell => "<# powershell #>\n\n",
            ShellType::Unknown => "",
        }
    }

    /// Returns true for shells with a preamble.
    pub fn is_known(&self) -> bool {
        !matches!(self, ShellType::Unknown)
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bash" => Ok(ShellType::Bash),
            "zsh" => Ok(ShellType::Zsh),
            "powershell" | "pwsh" => Ok(ShellType::PowerShell),
            "unknown" => Ok(ShellType::Unknown),
            other => Err(Error::validation(
                format!("unsupported shell {other:?}; expected bash, zsh or powershell"),
                Some("shell".to_string()),
            )),
        }
    }
}

////////////////////////////////////////// SessionConfig /////////////////////////////////////////

/// Everything that shapes a request, plus the running size of the transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub shell: ShellType,
    pub multi_turn: bool,
    pub token_count: u64,
}

impl SessionConfig {
    /// Creates a config with default sampling parameters and multi-turn off.
    pub fn new(model: impl Into<String>, shell: ShellType) -> Self {
        Self {
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            shell,
            multi_turn: false,
            token_count: 0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_shell(mut self, shell: ShellType) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_multi_turn(mut self, multi_turn: bool) -> Self {
        self.multi_turn = multi_turn;
        self
    }

    pub fn with_token_count(mut self, token_count: u64) -> Self {
        self.token_count = token_count;
        self
    }

    /// Checks the ranges the completion service enforces.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty()
            || self.model.contains('\n')
            || self.model.trim() != self.model
        {
            return Err(Error::validation(
                "model must be a non-empty single line without surrounding whitespace",
                Some("model".to_string()),
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature)
        {
            return Err(Error::validation(
                format!("temperature must be between 0 and {MAX_TEMPERATURE}"),
                Some("temperature".to_string()),
            ));
        }
        if self.max_tokens == 0 {
            return Err(Error::validation(
                "max_tokens must be positive",
                Some("max_tokens".to_string()),
            ));
        }
        Ok(())
    }

    /// The six record lines, in order, without a trailing newline on each.
    pub fn record_lines(&self) -> [String; 6] {
        [
            format!("model: {}", self.model),
            format!("temperature: {}", self.temperature),
            format!("max_tokens: {}", self.max_tokens),
            format!("shell: {}", self.shell),
            format!("multi_turn: {}", on_off(self.multi_turn)),
            format!("token_count: {}", self.token_count),
        ]
    }

    /// Serializes the config as a record.
    pub fn to_record(&self) -> String {
        let mut record = String::new();
        for line in self.record_lines() {
            record.push_str(&line);
            record.push('\n');
        }
        record
    }

    /// Parses a record produced by [`SessionConfig::to_record`].
    pub fn from_record(record: &str) -> Result<Self> {
        let lines: Vec<&str> = record.lines().collect();
        if lines.len() != FIELD_ORDER.len() {
            return Err(Error::config_parse(
                format!(
                    "expected {} fields, found {} lines",
                    FIELD_ORDER.len(),
                    lines.len()
                ),
                None,
            ));
        }
        Self::from_fields(&lines)
    }

    /// Parses exactly six `key: value` lines in record order.
    pub(crate) fn from_fields(lines: &[&str]) -> Result<Self> {
        let mut values = Vec::with_capacity(FIELD_ORDER.len());
        for (index, expected) in FIELD_ORDER.iter().enumerate() {
            let line_no = index + 1;
            let Some(line) = lines.get(index) else {
                return Err(Error::config_parse(
                    format!("missing field '{expected}'"),
                    Some(line_no),
                ));
            };
            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::config_parse(
                    format!("expected 'key: value', found {line:?}"),
                    Some(line_no),
                ));
            };
            if key.trim() != *expected {
                return Err(Error::config_parse(
                    format!("expected key '{expected}', found '{}'", key.trim()),
                    Some(line_no),
                ));
            }
            values.push(value.trim());
        }

        let parse_err = |line: usize, what: &str, value: &str| {
            Error::config_parse(format!("invalid {what} {value:?}"), Some(line))
        };
        let model = values[0].to_string();
        if model.is_empty() {
            return Err(parse_err(1, "model", values[0]));
        }
        let temperature = values[1]
            .parse::<f32>()
            .map_err(|_| parse_err(2, "temperature", values[1]))?;
        let max_tokens = values[2]
            .parse::<u32>()
            .map_err(|_| parse_err(3, "max_tokens", values[2]))?;
        let shell = values[3]
            .parse::<ShellType>()
            .map_err(|_| parse_err(4, "shell", values[3]))?;
        let multi_turn =
            parse_on_off(values[4]).ok_or_else(|| parse_err(5, "multi_turn", values[4]))?;
        let token_count = values[5]
            .parse::<u64>()
            .map_err(|_| parse_err(6, "token_count", values[5]))?;

        let config = Self {
            model,
            temperature,
            max_tokens,
            shell,
            multi_turn,
            token_count,
        };
        config.validate().map_err(|err| match err {
            Error::Validation { message, param } => {
                let line = param
                    .and_then(|p| FIELD_ORDER.iter().position(|field| *field == p))
                    .map(|index| index + 1);
                Error::config_parse(message, line)
            }
            other => other,
        })?;
        Ok(config)
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

/////////////////////////////////////////// ConfigStore //////////////////////////////////////////

/// Reads and writes the active session config record.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
    defaults: SessionConfig,
}

impl ConfigStore {
    /// Creates a store for the record at `path`, falling back to `defaults` on first run.
    pub fn new(path: impl Into<PathBuf>, defaults: SessionConfig) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    /// Returns true if a record has been persisted.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the record, distinguishing absence (`Ok(None)`) from corruption (`Err`).
    pub fn load(&self) -> Result<Option<SessionConfig>> {
        match read_optional(&self.path)? {
            Some(record) => SessionConfig::from_record(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Loads the record, writing and returning the defaults when none exists.
    pub fn read(&self) -> Result<SessionConfig> {
        match self.load()? {
            Some(config) => Ok(config),
            None => {
                debug!(path = %self.path.display(), "config record missing; writing defaults");
                self.write(&self.defaults)?;
                Ok(self.defaults.clone())
            }
        }
    }

    /// Validates and atomically persists `config`.
    pub fn write(&self, config: &SessionConfig) -> Result<()> {
        config.validate()?;
        atomic_write(&self.path, config.to_record().as_bytes())?;
        debug!(
            path = %self.path.display(),
            model = %config.model,
            shell = %config.shell,
            multi_turn = config.multi_turn,
            token_count = config.token_count,
            "config record written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionConfig {
        SessionConfig::new("m1", ShellType::Bash)
    }

    #[test]
    fn record_layout() {
        assert_eq!(
            sample().to_record(),
            "model: m1\ntemperature: 0\nmax_tokens: 300\nshell: bash\nmulti_turn: off\ntoken_count: 0\n"
        );
    }

    #[test]
    fn write_then_read_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("current_context.config");
        let store = ConfigStore::new(path, sample());
        let configs = [
            sample(),
            sample()
                .with_model("gpt-4o")
                .with_temperature(0.7)
                .with_max_tokens(1024)
                .with_shell(ShellType::PowerShell)
                .with_multi_turn(true)
                .with_token_count(1999),
            sample().with_shell(ShellType::Unknown).with_temperature(2.0),
        ];
        for config in configs {
            store.write(&config).unwrap();
            assert_eq!(store.read().unwrap(), config);
        }
    }

    #[test]
    fn read_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("current_context.config"), sample());
        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.read().unwrap(), sample());
        assert!(store.exists());
    }

    #[test]
    fn reordered_record_is_rejected() {
        let record =
            "temperature: 0\nmodel: m1\nmax_tokens: 300\nshell: bash\nmulti_turn: off\ntoken_count: 0\n";
        let err = SessionConfig::from_record(record).unwrap_err();
        assert!(err.is_config_parse());
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn truncated_record_is_rejected() {
        let record = "model: m1\ntemperature: 0\nmax_tokens: 300\nshell: bash\nmulti_turn: off\n";
        assert!(SessionConfig::from_record(record).unwrap_err().is_config_parse());
    }

    #[test]
    fn bad_values_are_rejected() {
        let cases = [
            "model: m1\ntemperature: warm\nmax_tokens: 300\nshell: bash\nmulti_turn: off\ntoken_count: 0\n",
            "model: m1\ntemperature: 0\nmax_tokens: -1\nshell: bash\nmulti_turn: off\ntoken_count: 0\n",
            "model: m1\ntemperature: 0\nmax_tokens: 300\nshell: fish\nmulti_turn: off\ntoken_count: 0\n",
            "model: m1\ntemperature: 0\nmax_tokens: 300\nshell: bash\nmulti_turn: yes\ntoken_count: 0\n",
            "model: m1\ntemperature: 7.5\nmax_tokens: 300\nshell: bash\nmulti_turn: off\ntoken_count: 0\n",
            "model: m1\ntemperature: 0\nmax_tokens: 0\nshell: bash\nmulti_turn: off\ntoken_count: 0\n",
        ];
        for record in cases {
            assert!(
                SessionConfig::from_record(record).unwrap_err().is_config_parse(),
                "{record}"
            );
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let hot = "model: m1\ntemperature: 7.5\nmax_tokens: 300\nshell: bash\nmulti_turn: off\ntoken_count: 0\n";
        let err = SessionConfig::from_record(hot).unwrap_err();
        assert!(err.is_config_parse());
        assert!(err.to_string().contains("line 2"), "{err}");

        let empty = "model: m1\ntemperature: 0\nmax_tokens: 0\nshell: bash\nmulti_turn: off\ntoken_count: 0\n";
        let err = SessionConfig::from_record(empty).unwrap_err();
        assert!(err.is_config_parse());
        assert!(err.to_string().contains("line 3"), "{err}");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_context.config");
        std::fs::write(&path, hot).unwrap();
        let store = ConfigStore::new(&path, sample());
        assert!(store.read().unwrap_err().is_config_parse());
    }

    #[test]
    fn padded_model_is_not_a_valid_config() {
        let padded = sample().with_model(" m1 ");
        assert!(padded.validate().unwrap_err().is_validation());

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("current_context.config"), sample());
        assert!(store.write(&padded).unwrap_err().is_validation());
        assert!(!store.exists());
    }

    #[test]
    fn corrupt_record_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_context.config");
        std::fs::write(&path, "garbage\n").unwrap();
        let store = ConfigStore::new(&path, sample());
        assert!(store.read().unwrap_err().is_config_parse());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "garbage\n");
    }

    #[test]
    fn validate_ranges() {
        assert!(sample().with_temperature(2.5).validate().is_err());
        assert!(sample().with_temperature(f32::NAN).validate().is_err());
        assert!(sample().with_max_tokens(0).validate().is_err());
        assert!(sample().with_model("").validate().is_err());
        assert!(sample().with_temperature(1.5).validate().is_ok());
    }

    #[test]
    fn shell_names() {
        assert_eq!("pwsh".parse::<ShellType>().unwrap(), ShellType::PowerShell);
        assert_eq!("Zsh".parse::<ShellType>().unwrap(), ShellType::Zsh);
        assert!("fish".parse::<ShellType>().is_err());
        assert_eq!(ShellType::Zsh.preamble(), "#!/bin/zsh\n\n");
        assert_eq!(ShellType::Unknown.preamble(), "");
    }
}
