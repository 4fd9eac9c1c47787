//! Command-line surface of the `nl2sh` binary.

use std::io::Read;
use std::path::{Path, PathBuf};

use arrrg_derive::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, warn};

use crate::credentials::CredentialKind;
use crate::encoding::{DEFAULT_CANDIDATES, Decoded, decode_with_fallback};
use crate::{Error, Result};

const INTERACTIVE_PROMPT: &str = "nl2sh> ";

/// Command-line arguments for nl2sh.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Read the query from a file instead of standard input.
    #[arrrg(optional, "Read the query from this file", "PATH")]
    pub file: Option<String>,

    /// Where credentials come from.
    #[arrrg(optional, "Credential source: file, env, hybrid (default: hybrid)", "SOURCE")]
    pub credentials: Option<String>,

    #[arrrg(optional, "Data directory (default: $NL2SH_HOME or the platform data dir)", "DIR")]
    pub data_dir: Option<String>,

    #[arrrg(optional, "Base URL of an OpenAI-compatible API", "URL")]
    pub base_url: Option<String>,

    /// Print the response as it is generated.
    #[arrrg(flag, "Stream the response as it is generated")]
    pub stream: bool,

    #[arrrg(flag, "Prompt for the query on the terminal")]
    pub interactive: bool,

    #[arrrg(flag, "Skip the moderation check")]
    pub no_moderation: bool,
}

/// Where the query text comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Interactive,
    Stdin,
}

/// Arguments resolved into what a run needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub input: InputSource,
    pub credentials: CredentialKind,
    pub data_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub stream: bool,
    pub moderation: bool,
}

impl RunOptions {
    /// Resolves parsed flags and free arguments.
    ///
    /// A free argument naming an existing file stands in for `--file`.
    pub fn resolve(args: CliArgs, free: &[String]) -> Result<Self> {
        let credentials = match args.credentials.as_deref() {
            Some(kind) => kind.parse()?,
            None => CredentialKind::default(),
        };
        let positional = free.iter().find(|arg| Path::new(arg).is_file());
        let input = match (args.file, positional) {
            (Some(file), _) => InputSource::File(PathBuf::from(file)),
            (None, Some(file)) => InputSource::File(PathBuf::from(file)),
            (None, None) if args.interactive => InputSource::Interactive,
            (None, None) => InputSource::Stdin,
        };
        Ok(Self {
            input,
            credentials,
            data_dir: args.data_dir.map(PathBuf::from),
            base_url: args.base_url,
            stream: args.stream,
            moderation: !args.no_moderation,
        })
    }
}

/// Reads the query from `source`, decoding bytes with the fallback list.
pub fn read_input(source: &InputSource) -> Result<String> {
    let bytes = match source {
        InputSource::File(path) => std::fs::read(path).map_err(|err| {
            Error::io(format!("cannot read query file {}", path.display()), err)
        })?,
        InputSource::Stdin => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|err| Error::io("cannot read standard input", err))?;
            bytes
        }
        InputSource::Interactive => return read_interactive(),
    };
    Ok(decode_input(&bytes))
}

fn decode_input(bytes: &[u8]) -> String {
    let Decoded {
        text,
        encoding,
        lossy,
    } = decode_with_fallback(bytes, &DEFAULT_CANDIDATES);
    if lossy {
        warn!(len = bytes.len(), "input did not decode cleanly; invalid bytes replaced");
    } else {
        debug!(%encoding, len = bytes.len(), "input decoded");
    }
    text
}

fn read_interactive() -> Result<String> {
    let mut editor = DefaultEditor::new()
        .map_err(|err| Error::unknown(format!("cannot open the terminal: {err}")))?;
    match editor.readline(INTERACTIVE_PROMPT) {
        Ok(line) => Ok(line),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
            Err(Error::abort("no query entered"))
        }
        Err(ReadlineError::Io(err)) => Err(Error::io("cannot read from the terminal", err)),
        Err(err) => Err(Error::unknown(format!("cannot read from the terminal: {err}"))),
    }
}
