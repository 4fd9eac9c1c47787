//! Credentials for the completion service.
//!
//! Credentials come from a JSON file, from the environment, or from both (the environment
//! supplies the key and model, the file supplies the response language).  Each source
//! implements [`CredentialSource`] so the session does not care which one is in use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::fs::{atomic_write, read_optional};
use crate::{Error, Result};

/// Model used when no source names one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ORGANIZATION_ENV: &str = "OPENAI_ORGANIZATION_ID";
pub const MODEL_ENV: &str = "OPENAI_MODEL";

const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY";
const ORGANIZATION_PLACEHOLDER: &str = "YOUR_ORGANIZATION_ID";

/// Language the system prompt is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    Japanese,
    English,
}

impl Language {
    /// Parses a language code; `ja` is Japanese and anything else is English.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("ja") {
            Language::Japanese
        } else {
            Language::English
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::Japanese => "ja",
            Language::English => "en",
        }
    }
}

/// What a session needs to talk to the completion service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub organization: Option<String>,
    pub model: String,
    pub language: Language,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("organization", &self.organization)
            .field("model", &self.model)
            .field("language", &self.language)
            .finish()
    }
}

/// A place credentials can be loaded from.
pub trait CredentialSource {
    /// Loads credentials, returning [`Error::ConfigMissing`] when the source is not set up.
    fn load_credentials(&self) -> Result<Credentials>;
}

/// Shape of the JSON credentials file.
#[derive(Debug, Default, Deserialize, Serialize)]
struct CredentialsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

impl CredentialsFile {
    fn read(path: &Path) -> Result<Option<Self>> {
        match read_optional(path)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn write_template(path: &Path, template: &Self) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        let mut json = serde_json::to_string_pretty(template)?;
        json.push('\n');
        atomic_write(path, json.as_bytes())?;
        info!(path = %path.display(), "wrote credentials template");
        Ok(())
    }
}

fn non_placeholder(value: Option<String>, placeholder: &str) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != placeholder)
}

////////////////////////////////////////// FileCredentials ////////////////////////////////////////

/// Credentials from a JSON file such as `~/.openai/codex-cli.json`.
#[derive(Clone, Debug)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for FileCredentials {
    fn load_credentials(&self) -> Result<Credentials> {
        let Some(file) = CredentialsFile::read(&self.path)? else {
            warn!(path = %self.path.display(), "credentials file missing");
            CredentialsFile::write_template(
                &self.path,
                &CredentialsFile {
                    api_key: Some(API_KEY_PLACEHOLDER.to_string()),
                    organization: Some(ORGANIZATION_PLACEHOLDER.to_string()),
                    model: Some(DEFAULT_MODEL.to_string()),
                    language: Some(Language::default().code().to_string()),
                },
            )?;
            return Err(Error::config_missing(
                "credentials file created; fill in api_key and run again",
                Some(self.path.clone()),
            ));
        };
        let Some(api_key) = non_placeholder(file.api_key, API_KEY_PLACEHOLDER) else {
            return Err(Error::config_missing(
                "api_key is not set in the credentials file",
                Some(self.path.clone()),
            ));
        };
        debug!(path = %self.path.display(), "credentials loaded from file");
        Ok(Credentials {
            api_key,
            organization: non_placeholder(file.organization, ORGANIZATION_PLACEHOLDER),
            model: file
                .model
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            language: file
                .language
                .as_deref()
                .map(Language::from_code)
                .unwrap_or_default(),
        })
    }
}

////////////////////////////////////////// EnvCredentials /////////////////////////////////////////

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials from `OPENAI_API_KEY`, `OPENAI_ORGANIZATION_ID` and `OPENAI_MODEL`.
pub struct EnvCredentials {
    lookup: Lookup,
}

impl EnvCredentials {
    /// Reads the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup` instead of the process environment.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn missing_key() -> Error {
        Error::config_missing(
            format!(
                "{API_KEY_ENV} is not set; export {API_KEY_ENV}=<key> \
                 (optional: {ORGANIZATION_ENV}, {MODEL_ENV}, default {DEFAULT_MODEL})"
            ),
            None,
        )
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EnvCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvCredentials").finish_non_exhaustive()
    }
}

impl CredentialSource for EnvCredentials {
    fn load_credentials(&self) -> Result<Credentials> {
        let api_key = self.var(API_KEY_ENV).ok_or_else(Self::missing_key)?;
        debug!("credentials loaded from environment");
        Ok(Credentials {
            api_key,
            organization: self.var(ORGANIZATION_ENV),
            model: self
                .var(MODEL_ENV)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            language: Language::default(),
        })
    }
}

///////////////////////////////////////// HybridCredentials ///////////////////////////////////////

/// Environment credentials with the language taken from the JSON file when present.
#[derive(Debug)]
pub struct HybridCredentials {
    env: EnvCredentials,
    path: PathBuf,
}

impl HybridCredentials {
    pub fn new(env: EnvCredentials, path: impl Into<PathBuf>) -> Self {
        Self {
            env,
            path: path.into(),
        }
    }
}

impl CredentialSource for HybridCredentials {
    fn load_credentials(&self) -> Result<Credentials> {
        let language = match CredentialsFile::read(&self.path) {
            Ok(Some(file)) => file
                .language
                .as_deref()
                .map(Language::from_code)
                .unwrap_or_default(),
            Ok(None) => Language::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable credentials file");
                Language::default()
            }
        };
        match self.env.load_credentials() {
            Ok(credentials) => Ok(Credentials {
                language,
                ..credentials
            }),
            Err(err) if err.is_config_missing() => {
                let template = CredentialsFile {
                    language: Some(language.code().to_string()),
                    ..CredentialsFile::default()
                };
                if let Err(write_err) = CredentialsFile::write_template(&self.path, &template) {
                    warn!(error = %write_err, "cannot write credentials template");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

////////////////////////////////////////// CredentialKind /////////////////////////////////////////

/// Which credential source to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialKind {
    File,
    Env,
    #[default]
    Hybrid,
}

impl CredentialKind {
    /// Builds the source, using `path` for the JSON file.
    pub fn source(&self, path: PathBuf) -> Box<dyn CredentialSource> {
        match self {
            CredentialKind::File => Box::new(FileCredentials::new(path)),
            CredentialKind::Env => Box::new(EnvCredentials::new()),
            CredentialKind::Hybrid => Box::new(HybridCredentials::new(EnvCredentials::new(), path)),
        }
    }
}

impl FromStr for CredentialKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CredentialKind::File),
            "env" => Ok(CredentialKind::Env),
            "hybrid" => Ok(CredentialKind::Hybrid),
            other => Err(Error::validation(
                format!("unknown credential source {other:?}; expected file, env or hybrid"),
                Some("credentials".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> EnvCredentials {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvCredentials::with_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn env_defaults() {
        let creds = env(&[(API_KEY_ENV, "sk-test")]).load_credentials().unwrap();
        assert_eq!(creds.api_key, "sk-test");
        assert_eq!(creds.organization, None);
        assert_eq!(creds.model, DEFAULT_MODEL);
        assert_eq!(creds.language, Language::Japanese);
    }

    #[test]
    fn env_values_are_trimmed() {
        let creds = env(&[(API_KEY_ENV, " sk-test\n"), (MODEL_ENV, " gpt-4o-mini ")])
            .load_credentials()
            .unwrap();
        assert_eq!(creds.api_key, "sk-test");
        assert_eq!(creds.model, "gpt-4o-mini");
        assert!(
            crate::SessionConfig::new(creds.model, crate::ShellType::Bash)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn env_requires_key() {
        let err = env(&[(MODEL_ENV, "gpt-4o-mini")])
            .load_credentials()
            .unwrap_err();
        assert!(err.is_config_missing());
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn file_missing_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".openai").join("codex-cli.json");
        let err = FileCredentials::new(&path).load_credentials().unwrap_err();
        assert!(err.is_config_missing());
        let template = std::fs::read_to_string(&path).unwrap();
        assert!(template.contains(API_KEY_PLACEHOLDER));

        // The untouched template still counts as missing.
        let err = FileCredentials::new(&path).load_credentials().unwrap_err();
        assert!(err.is_config_missing());
    }

    #[test]
    fn file_credentials_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codex-cli.json");
        std::fs::write(
            &path,
            r#"{"api_key": "sk-file", "organization": "org-1", "language": "en"}"#,
        )
        .unwrap();
        let creds = FileCredentials::new(&path).load_credentials().unwrap();
        assert_eq!(creds.api_key, "sk-file");
        assert_eq!(creds.organization.as_deref(), Some("org-1"));
        assert_eq!(creds.model, DEFAULT_MODEL);
        assert_eq!(creds.language, Language::English);
    }

    #[test]
    fn hybrid_takes_language_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codex-cli.json");
        std::fs::write(&path, r#"{"language": "en"}"#).unwrap();
        let source = HybridCredentials::new(
            env(&[(API_KEY_ENV, "sk-env"), (MODEL_ENV, "gpt-4o-mini")]),
            &path,
        );
        let creds = source.load_credentials().unwrap();
        assert_eq!(creds.api_key, "sk-env");
        assert_eq!(creds.model, "gpt-4o-mini");
        assert_eq!(creds.language, Language::English);
    }

    #[test]
    fn hybrid_missing_key_writes_language_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".openai").join("codex-cli.json");
        let source = HybridCredentials::new(env(&[]), &path);
        assert!(source.load_credentials().unwrap_err().is_config_missing());
        let template = std::fs::read_to_string(&path).unwrap();
        assert!(template.contains("\"language\": \"ja\""));
        assert!(!template.contains("api_key"));
    }

    #[test]
    fn debug_redacts_key() {
        let creds = env(&[(API_KEY_ENV, "sk-secret")]).load_credentials().unwrap();
        assert!(!format!("{creds:?}").contains("sk-secret"));
    }

    #[test]
    fn credential_kind_names() {
        assert_eq!("FILE".parse::<CredentialKind>().unwrap(), CredentialKind::File);
        assert_eq!("hybrid".parse::<CredentialKind>().unwrap(), CredentialKind::Hybrid);
        assert!("vault".parse::<CredentialKind>().is_err());
    }
}
