//! Assembly of the outbound prompt.

use crate::config::{SessionConfig, ShellType};
use crate::credentials::Language;
use crate::types::{ChatMessage, CompletionRequest};

/// Human-readable name of the operating system nl2sh runs on.
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

/// Instructions that make the model answer with comment lines and bare commands.
pub fn system_prompt(language: Language, shell: ShellType, os: &str) -> String {
    match language {
        Language::Japanese => format!(
            "あなたはコマンドライン専門のアシスタントです。\n\
             以下のフォーマットで回答してください：\n\
             1. まず「# 」で始まる1行のコメントで、何をするコマンドかを簡潔に説明する\n\
             2. 次の行に実行可能な{shell}のコマンドを提示する（説明なし）\n\
             3. 必要に応じて、追加の「# 」コメント行とコマンド行のペアを続ける\n\
             \n\
             コマンドの前後にはバッククォート(`)やその他の記号を付けないでください。\n\
             複数のコマンドが必要な場合は、それらを別々の行に表示してください。\n\
             長い説明は避け、簡潔なコメントと実用的なコマンドに集中してください。\n\
             現在のOSは{os}です。"
        ),
        Language::English => format!(
            "You are a command line specialist assistant.\n\
             Respond in the following format:\n\
             1. First, a one-line comment starting with \"# \" that briefly explains what the \
             command does\n\
             2. Next line, provide an executable {shell} command (without explanation)\n\
             3. If needed, continue with additional \"# \" comment lines and command line pairs\n\
             \n\
             Do not surround commands with backticks (`) or other symbols.\n\
             If multiple commands are necessary, display them on separate lines.\n\
             Avoid lengthy explanations, focus on concise comments and practical commands.\n\
             The current OS is {os}."
        ),
    }
}

/// Concatenates the shell preamble, the replayed transcript and the new input.
pub fn assemble(preamble: &str, transcript: &str, input: &str) -> String {
    let mut prompt = String::with_capacity(preamble.len() + transcript.len() + input.len());
    prompt.push_str(preamble);
    prompt.push_str(transcript);
    prompt.push_str(input);
    prompt
}

/// Builds the completion request for `input` under `config`.
pub fn build_request(
    config: &SessionConfig,
    language: Language,
    transcript: &str,
    input: &str,
) -> CompletionRequest {
    let messages = vec![
        ChatMessage::system(system_prompt(language, config.shell, os_name())),
        ChatMessage::user(assemble(config.shell.preamble(), transcript, input)),
    ];
    CompletionRequest::new(config.model.clone(), messages)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
}
