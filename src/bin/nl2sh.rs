//! Turn a natural-language request into a shell command.
//!
//! # Usage
//!
//! ```bash
//! # Ask for a command; the query is read from standard input
//! echo "# list the ten largest files here" | nl2sh
//!
//! # Read the query from a file and stream the answer
//! nl2sh --stream query.txt
//!
//! # Directives are handled locally
//! echo "# start multi-turn" | nl2sh
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use nl2sh::cli::{CliArgs, RunOptions, read_input};
use nl2sh::logging::init_logging;
use nl2sh::paths::default_credentials_path;
use nl2sh::shell::detect_shell;
use nl2sh::{
    DataLayout, Error, Invocation, OpenAi, PlainTextRenderer, Result, Session, SessionController,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let (args, free) = CliArgs::from_command_line_relaxed("nl2sh [OPTIONS] [QUERY_FILE]");
    match run(args, free).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.is_empty_query() => {
            println!("\n{}", err.user_message());
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("\n{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs, free: Vec<String>) -> Result<Invocation> {
    let options = RunOptions::resolve(args, &free)?;
    let layout = DataLayout::from_env(options.data_dir.clone())?;
    let _guard = init_logging(layout.root())?;
    let result = invoke(options, layout).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "invocation failed");
    }
    result
}

async fn invoke(options: RunOptions, layout: DataLayout) -> Result<Invocation> {
    let credentials_path = default_credentials_path()
        .ok_or_else(|| Error::config_missing("cannot locate the home directory", None))?;
    let credentials = options
        .credentials
        .source(credentials_path)
        .load_credentials()?;
    let shell = detect_shell();
    let input = read_input(&options.input)?;

    let client = OpenAi::with_options(&credentials, options.base_url.as_deref(), None)?;
    let session = Session::new(layout, shell, credentials);
    let mut controller = SessionController::open(session, Box::new(client.clone()))?
        .with_streaming(options.stream);
    if options.moderation {
        controller = controller.with_moderation(Box::new(client));
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })
    .map_err(|err| Error::unknown(format!("cannot install Ctrl-C handler: {err}")))?;
    let mut renderer = PlainTextRenderer::new().with_interrupt(interrupted);

    controller.run(&input, &mut renderer).await
}
