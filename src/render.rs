//! Output rendering.
//!
//! Everything nl2sh prints lands in the user's shell buffer.  Model output is printed as-is;
//! status and error messages are printed as comment lines so the buffer stays safe to execute.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Indentation used for status lines, e.g. `#   Multi turn mode is on`.
pub const COMMENT_PREFIX: &str = "#   ";

/// Prefixes every line of `text` with [`COMMENT_PREFIX`].
pub fn comment_lines(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if line.starts_with('#') {
            out.push_str(line);
        } else {
            out.push_str(COMMENT_PREFIX);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Trait for rendering command output and status messages.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text on stdout for the shell integration
/// - Recording for tests
pub trait Renderer: Send {
    /// Print a chunk of model output.
    ///
    /// This is called incrementally when streaming.
    fn print_text(&mut self, text: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Called when the model output is complete.
    fn finish_response(&mut self) {}

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self) {
        self.print_info("[interrupted]");
    }

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer writing to stdout.
pub struct PlainTextRenderer {
    stdout: Stdout,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer.
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.stdout.write_all(text.as_bytes());
        self.line_start = text.ends_with('\n');
        self.flush();
    }

    fn write_comment(&mut self, text: &str) {
        let mut out = String::from("\n");
        if !self.line_start {
            out.push('\n');
        }
        out.push_str(&comment_lines(text));
        self.write(&out);
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_info(&mut self, info: &str) {
        self.write_comment(info);
    }

    fn print_error(&mut self, error: &str) {
        self.write_comment(error);
    }

    fn finish_response(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Renderer that keeps everything it is given, for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub text: String,
    pub info: Vec<String>,
    pub errors: Vec<String>,
    pub finished: usize,
    pub interrupted: bool,
    interrupt_after: Option<usize>,
    chunks: usize,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an interrupt once `chunks` text chunks have been printed.
    pub fn interrupt_after(mut self, chunks: usize) -> Self {
        self.interrupt_after = Some(chunks);
        self
    }

    /// Returns true if any info line contains `needle`.
    pub fn saw_info(&self, needle: &str) -> bool {
        self.info.iter().any(|line| line.contains(needle))
    }
}

impl Renderer for RecordingRenderer {
    fn print_text(&mut self, text: &str) {
        self.chunks += 1;
        self.text.push_str(text);
    }

    fn print_info(&mut self, info: &str) {
        self.info.push(info.to_string());
    }

    fn print_error(&mut self, error: &str) {
        self.errors.push(error.to_string());
    }

    fn finish_response(&mut self) {
        self.finished += 1;
    }

    fn print_interrupted(&mut self) {
        self.interrupted = true;
    }

    fn should_interrupt(&self) -> bool {
        self.interrupt_after.is_some_and(|n| self.chunks >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_lines_prefixes_each_line() {
        assert_eq!(
            comment_lines("model: m1\ntemperature: 0"),
            "#   model: m1\n#   temperature: 0\n"
        );
        assert_eq!(comment_lines("# already"), "# already\n");
    }

    #[test]
    fn plain_renderer_follows_interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let renderer = PlainTextRenderer::new().with_interrupt(Arc::clone(&flag));
        assert!(!renderer.should_interrupt());
        flag.store(true, Ordering::Relaxed);
        assert!(renderer.should_interrupt());
    }

    #[test]
    fn recording_renderer_interrupts_after_chunks() {
        let mut renderer = RecordingRenderer::new().interrupt_after(2);
        renderer.print_text("ls");
        assert!(!renderer.should_interrupt());
        renderer.print_text(" -la");
        assert!(renderer.should_interrupt());
        assert_eq!(renderer.text, "ls -la");
    }
}
