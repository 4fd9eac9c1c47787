//! One invocation of nl2sh: a directive or a query.

use tracing::{debug, info, warn};

use crate::client::{CompletionClient, ModerationClient};
use crate::commands::{self, CommandOutcome};
use crate::config::{ConfigStore, SessionConfig, ShellType};
use crate::context::ContextBuffer;
use crate::credentials::Credentials;
use crate::observability::{MODERATION_ERRORS, MODERATION_FLAGS, QUERIES};
use crate::paths::DataLayout;
use crate::prompt;
use crate::render::Renderer;
use crate::Result;

const UNKNOWN_SHELL_WARNING: &str = "Unsupported shell type, please use # set shell <shell>";
const REDACTED_NOTICE: &str = "Sensitive content detected, response has been redacted";

/// Process-wide facts an invocation runs under.
#[derive(Clone, Debug)]
pub struct Session {
    pub layout: DataLayout,
    pub shell: ShellType,
    pub credentials: Credentials,
}

impl Session {
    pub fn new(layout: DataLayout, shell: ShellType, credentials: Credentials) -> Self {
        Self {
            layout,
            shell,
            credentials,
        }
    }

    /// Config used when no record exists yet.
    pub fn default_config(&self) -> SessionConfig {
        SessionConfig::new(self.credentials.model.clone(), self.shell)
    }

    /// Name of the snapshot loaded at startup for this shell.
    pub fn startup_snapshot(&self) -> String {
        format!("{}-context", self.shell)
    }
}

/// Result of a query that reached the model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    pub response: String,
    pub flagged: bool,
    pub appended: bool,
}

/// What an invocation turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    Command(String),
    Query(QueryOutcome),
}

/// Drives directives and queries against one data directory.
pub struct SessionController {
    session: Session,
    buffer: ContextBuffer,
    completion: Box<dyn CompletionClient>,
    moderation: Option<Box<dyn ModerationClient>>,
    stream: bool,
}

impl SessionController {
    /// Opens the active context, loading the shell's startup snapshot when one is saved.
    pub fn open(session: Session, completion: Box<dyn CompletionClient>) -> Result<Self> {
        let store = ConfigStore::new(session.layout.config_record(), session.default_config());
        let mut buffer = ContextBuffer::open(session.layout.clone(), store)?;
        let startup = session.startup_snapshot();
        if buffer.snapshot_exists(&startup)? {
            buffer.load_snapshot(&startup, true)?;
            debug!(snapshot = %startup, "startup snapshot loaded");
        }
        Ok(Self {
            session,
            buffer,
            completion,
            moderation: None,
            stream: false,
        })
    }

    pub fn with_moderation(mut self, moderation: Box<dyn ModerationClient>) -> Self {
        self.moderation = Some(moderation);
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn buffer(&self) -> &ContextBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ContextBuffer {
        &mut self.buffer
    }

    /// Runs `input` as a directive if it is one, otherwise as a query.
    pub async fn run(&mut self, input: &str, renderer: &mut dyn Renderer) -> Result<Invocation> {
        if let CommandOutcome::Handled(message) =
            commands::process(input, &mut self.buffer, renderer)?
        {
            return Ok(Invocation::Command(message));
        }
        self.query(input, renderer).await.map(Invocation::Query)
    }

    async fn query(&mut self, input: &str, renderer: &mut dyn Renderer) -> Result<QueryOutcome> {
        if !self.buffer.config().shell.is_known() {
            warn!("query with unknown shell type");
            renderer.print_info(UNKNOWN_SHELL_WARNING);
        }
        self.buffer.token_count()?;
        let transcript = self.buffer.read(input)?;
        let config = self.buffer.config().clone();
        let request =
            prompt::build_request(&config, self.session.credentials.language, &transcript, input);
        info!(
            model = %config.model,
            shell = %config.shell,
            stream = self.stream,
            transcript_words = crate::context::word_count(&transcript),
            "sending query"
        );

        let (response, flagged) = if self.stream {
            if self.is_flagged(input).await {
                renderer.print_info(REDACTED_NOTICE);
                (String::new(), true)
            } else {
                let response = self.completion.complete_streaming(request, renderer).await?;
                (response, false)
            }
        } else {
            let response = self.completion.complete(request).await?;
            if self.is_flagged(&format!("{input}\n{response}")).await {
                renderer.print_info(REDACTED_NOTICE);
                (response, true)
            } else {
                renderer.print_text(&response);
                renderer.finish_response();
                (response, false)
            }
        };
        QUERIES.click();

        let appended = !flagged && config.multi_turn && !response.trim().is_empty();
        if appended {
            self.buffer.append(input, &response)?;
        }
        debug!(flagged, appended, response_len = response.len(), "query finished");
        Ok(QueryOutcome {
            response,
            flagged,
            appended,
        })
    }

    /// Moderation failures never block a query.
    async fn is_flagged(&self, text: &str) -> bool {
        let Some(moderation) = &self.moderation else {
            return false;
        };
        match moderation.is_flagged(text).await {
            Ok(true) => {
                MODERATION_FLAGS.click();
                warn!("moderation flagged content");
                true
            }
            Ok(false) => false,
            Err(err) => {
                MODERATION_ERRORS.click();
                warn!(error = %err, "moderation check failed; treating as not flagged");
                false
            }
        }
    }
}
