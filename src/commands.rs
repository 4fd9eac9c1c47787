//! In-band directives.
//!
//! A line starting with `#` followed by a recognized verb controls the session instead of being
//! sent to the model.  Matching is by exact token count: `# set temperature 0.5` is a directive,
//! while `# set up a cron job for backups` is an ordinary question and goes to the model.

use tracing::{debug, info};

use crate::config::{MAX_TEMPERATURE, ShellType};
use crate::context::{ContextBuffer, list_snapshots};
use crate::observability::DIRECTIVES;
use crate::render::Renderer;
use crate::utils::time::archive_stamp;
use crate::{Error, Result};

/// Character that introduces a directive.
pub const DIRECTIVE_MARKER: char = '#';

/// A parsed directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Change the model used for completions.
    SetModel(String),

    /// Set the sampling temperature.
    SetTemperature(f32),

    /// Set the maximum tokens per response.
    SetMaxTokens(u32),

    /// Change the shell commands are written for.
    SetShell(ShellType),

    /// Show the active configuration.
    ShowConfig,

    /// Start (`true`) or stop (`false`) recording turns.
    MultiTurn(bool),

    /// Load the `<shell>-context` snapshot.
    DefaultContext,

    /// Print the transcript, or only its last `n` lines.
    ShowContext(Option<usize>),

    /// Save the active context, under a timestamp when no name is given.
    SaveContext(Option<String>),

    /// Archive and empty the transcript.
    ClearContext,

    /// Load a named snapshot.
    LoadContext(String),

    /// List saved snapshots.
    ListContexts,

    /// Forget the most recent turn.
    Unlearn,

    /// Display help information.
    Help,

    /// A recognized directive with an unusable argument.
    Invalid(String),
}

/// Result of offering input to the command processor.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The input was a directive; the message was shown to the user.
    Handled(String),
    /// The input is a query for the model.
    Query,
}

impl CommandOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, CommandOutcome::Handled(_))
    }
}

/// Parses a directive.
///
/// Returns `None` if the input should be treated as a query.  This includes marker-prefixed
/// input whose verb or argument count matches no directive.
///
/// # Examples
///
/// ```
/// # use nl2sh::{Directive, parse_directive};
/// assert_eq!(parse_directive("# unlearn"), Some(Directive::Unlearn));
/// assert_eq!(parse_directive("# start multi-turn"), Some(Directive::MultiTurn(true)));
/// assert_eq!(parse_directive("# list all running docker containers"), None);
/// ```
pub fn parse_directive(input: &str) -> Option<Directive> {
    let input = input.trim();
    if input.contains('\n') {
        return None;
    }
    let rest = input.strip_prefix(DIRECTIVE_MARKER)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let verbs: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let verbs: Vec<&str> = verbs.iter().map(String::as_str).collect();

    let directive = match verbs.as_slice() {
        ["set", field, _] => parse_set(field, tokens[2])?,
        ["show", "config"] => Directive::ShowConfig,
        ["start", "multi-turn" | "multi_turn"] => Directive::MultiTurn(true),
        ["stop", "multi-turn" | "multi_turn"] => Directive::MultiTurn(false),
        ["default", "context"] => Directive::DefaultContext,
        ["show" | "view", "context"] => Directive::ShowContext(None),
        ["show", "context", n] => match n.parse::<usize>() {
            Ok(n) => Directive::ShowContext(Some(n)),
            Err(_) => Directive::Invalid(
                "# show context expects a number of lines, e.g. # show context 10".to_string(),
            ),
        },
        ["save", "context"] => Directive::SaveContext(None),
        ["save", "context", _] => Directive::SaveContext(Some(tokens[2].to_string())),
        ["clear", "context"] => Directive::ClearContext,
        ["load", "context"] => Directive::Invalid(
            "# load context requires a name, e.g. # load context bash-context".to_string(),
        ),
        ["load", "context", _] => Directive::LoadContext(tokens[2].to_string()),
        ["list", "contexts"] => Directive::ListContexts,
        ["unlearn"] => Directive::Unlearn,
        ["help"] => Directive::Help,
        _ => return None,
    };
    Some(directive)
}

fn parse_set(field: &str, value: &str) -> Option<Directive> {
    let directive = match field {
        "model" | "engine" => Directive::SetModel(value.to_string()),
        "temperature" => match parse_f32_in_range(value, 0.0, MAX_TEMPERATURE) {
            Ok(value) => Directive::SetTemperature(value),
            Err(err) => Directive::Invalid(format!("# set temperature {err}")),
        },
        "max_tokens" => match value.parse::<u32>() {
            Ok(value) if value > 0 => Directive::SetMaxTokens(value),
            _ => Directive::Invalid("# set max_tokens expects a positive integer".to_string()),
        },
        "shell" => match value.parse::<ShellType>() {
            Ok(shell) => Directive::SetShell(shell),
            Err(_) => Directive::Invalid(
                "# set shell expects bash, zsh, powershell or unknown".to_string(),
            ),
        },
        _ => return None,
    };
    Some(directive)
}

fn parse_f32_in_range(value: &str, min: f32, max: f32) -> std::result::Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("expects a value between {min} and {max}"))?;
    if parsed.is_finite() && parsed >= min && parsed <= max {
        Ok(parsed)
    } else {
        Err(format!("expects a value between {min} and {max}"))
    }
}

/// Returns help text describing available directives.
pub fn help_text() -> &'static str {
    r#"Available directives:
  # set model <name>         Change the model (alias: # set engine <name>)
  # set temperature <v>      Set temperature 0.0-2.0
  # set max_tokens <n>       Set maximum response tokens
  # set shell <shell>        Set the shell: bash, zsh, powershell
  # show config              Show the current configuration
  # start multi-turn         Remember each question and answer
  # stop multi-turn          Stop remembering turns
  # show context [n]         Show the context, or its last n lines
  # view context             Show the context
  # save context [name]      Save the context (default name: timestamp)
  # load context <name>      Load a saved context
  # list contexts            List saved contexts
  # default context          Load the context saved for the current shell
  # clear context            Archive and empty the context
  # unlearn                  Forget the last question and answer
  # help                     Show this help message"#
}

/// Offers `input` to the command processor.
///
/// Directives mutate the context and report back through `renderer`.  Problems with a
/// directive's argument are reported and the directive counts as handled; failures to persist
/// state are returned.
pub fn process(
    input: &str,
    buffer: &mut ContextBuffer,
    renderer: &mut dyn Renderer,
) -> Result<CommandOutcome> {
    let Some(directive) = parse_directive(input) else {
        return Ok(CommandOutcome::Query);
    };
    DIRECTIVES.click();
    debug!(?directive, "directive");
    match execute(&directive, buffer) {
        Ok(message) => {
            renderer.print_info(&message);
            Ok(CommandOutcome::Handled(message))
        }
        Err(err) if err.is_validation() || err.is_config_parse() || err.is_not_found() => {
            let message = err.to_string();
            renderer.print_error(&message);
            Ok(CommandOutcome::Handled(message))
        }
        Err(err) => Err(err),
    }
}

/// Applies `directive`, returning the confirmation to show.
pub fn execute(directive: &Directive, buffer: &mut ContextBuffer) -> Result<String> {
    let config = buffer.config().clone();
    let message = match directive {
        Directive::SetModel(model) => {
            buffer.replace_config(config.with_model(model.clone()))?;
            format!("Model set to {model}")
        }
        Directive::SetTemperature(temperature) => {
            buffer.replace_config(config.with_temperature(*temperature))?;
            format!("Temperature set to {temperature}")
        }
        Directive::SetMaxTokens(max_tokens) => {
            buffer.replace_config(config.with_max_tokens(*max_tokens))?;
            format!("Max tokens set to {max_tokens}")
        }
        Directive::SetShell(shell) => {
            buffer.replace_config(config.with_shell(*shell))?;
            format!("Shell set to {shell}")
        }
        Directive::ShowConfig => {
            buffer.token_count()?;
            buffer.config().record_lines().join("\n")
        }
        Directive::MultiTurn(on) => {
            buffer.replace_config(config.with_multi_turn(*on))?;
            if *on {
                "Multi turn mode is on".to_string()
            } else {
                "Multi turn mode is off".to_string()
            }
        }
        Directive::DefaultContext => load(buffer, &format!("{}-context", config.shell))?,
        Directive::ShowContext(lines) => {
            let transcript = buffer.transcript()?;
            if transcript.trim().is_empty() {
                "Context is empty".to_string()
            } else {
                let all: Vec<&str> = transcript.lines().collect();
                let skip = lines.map_or(0, |n| all.len().saturating_sub(n));
                all[skip..].join("\n")
            }
        }
        Directive::SaveContext(name) => {
            let name = name.clone().unwrap_or_else(archive_stamp);
            let path = buffer.save_as(&name)?;
            let saved = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(name);
            format!("Context saved to {saved}")
        }
        Directive::ClearContext => {
            let archive = buffer.clear()?;
            format!(
                "Context has been cleared, temporarily saved to {}",
                archive.display()
            )
        }
        Directive::LoadContext(name) => load(buffer, name)?,
        Directive::ListContexts => {
            let names = list_snapshots(buffer.layout())?;
            if names.is_empty() {
                "No saved contexts".to_string()
            } else {
                names.join("\n")
            }
        }
        Directive::Unlearn => {
            buffer.undo_last()?;
            "Unlearned interaction".to_string()
        }
        Directive::Help => help_text().to_string(),
        Directive::Invalid(message) => {
            return Err(Error::validation(message.clone(), None));
        }
    };
    info!(?directive, "directive applied");
    Ok(message)
}

fn load(buffer: &mut ContextBuffer, name: &str) -> Result<String> {
    if buffer.load_snapshot(name, false)? {
        Ok(format!("Context loaded from {name}"))
    } else {
        Err(Error::not_found(
            format!("no saved context named {name:?}"),
            Some("context".to_string()),
            Some(name.to_string()),
        ))
    }
}
