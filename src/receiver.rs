use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AdbError, Result};

/// Sink for shell output lines. Streaming operations push each
/// completed line through `add_output` and always call `flush` when
/// the stream ends, cancelled or not.
pub trait ShellReceiver {
    fn add_output(&mut self, line: &str);
    fn flush(&mut self);
}

/// Adapter that turns arbitrary output chunks into batches of
/// complete lines. Partial input is retained across calls; completed
/// `\n`-terminated lines (with any `\r` stripped) are handed to the
/// callback as a batch, and the unterminated tail is delivered on
/// `flush`.
pub struct MultiLineReceiver<F>
where
    F: FnMut(&[String]),
{
    buffer: String,
    process_lines: F,
}

impl<F> MultiLineReceiver<F>
where
    F: FnMut(&[String]),
{
    pub fn new(process_lines: F) -> MultiLineReceiver<F> {
        MultiLineReceiver {
            buffer: String::new(),
            process_lines,
        }
    }

    fn drain_complete_lines(&mut self) {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return;
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);
        let lines: Vec<String> = complete
            .split_terminator('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        if !lines.is_empty() {
            (self.process_lines)(&lines);
        }
    }
}

impl<F> ShellReceiver for MultiLineReceiver<F>
where
    F: FnMut(&[String]),
{
    fn add_output(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.drain_complete_lines();
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            let line = tail.trim_end_matches('\r').to_string();
            (self.process_lines)(&[line]);
        }
    }
}

lazy_static! {
    static ref FILE_NOT_FOUND: Regex =
        Regex::new(r"(?i)(not found|No such file or directory|applet not found)").unwrap();
    static ref UNKNOWN_OPTION: Regex = Regex::new(r"Unknown option").unwrap();
    static ref ABORTING: Regex = Regex::new(r"Aborting\.").unwrap();
    static ref PERMISSION_DENIED: Regex =
        Regex::new(r"(?i)(permission denied|access denied)").unwrap();
}

/// Receiver for console-style command output. Prompt echo lines
/// (starting with `$` or `#`) are dropped; everything else is
/// accumulated. Error patterns are only raised when the caller asks
/// via [`ConsoleOutputReceiver::throw_on_error`].
#[derive(Default)]
pub struct ConsoleOutputReceiver {
    lines: Vec<String>,
}

impl ConsoleOutputReceiver {
    pub fn new() -> ConsoleOutputReceiver {
        ConsoleOutputReceiver::default()
    }

    /// Accumulated output, newline-terminated per line.
    pub fn output(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Raise the typed error matching a recognised failure pattern in
    /// `line`, if any.
    pub fn throw_on_error(&self, line: &str) -> Result<()> {
        if FILE_NOT_FOUND.is_match(line) {
            return Err(AdbError::FileNotFound(line.to_string()));
        }
        if UNKNOWN_OPTION.is_match(line) {
            return Err(AdbError::UnknownOption(line.to_string()));
        }
        if ABORTING.is_match(line) {
            return Err(AdbError::CommandAborting(line.to_string()));
        }
        if PERMISSION_DENIED.is_match(line) {
            return Err(AdbError::PermissionDenied(line.to_string()));
        }
        Ok(())
    }
}

impl ShellReceiver for ConsoleOutputReceiver {
    fn add_output(&mut self, line: &str) {
        let trimmed = line.trim_start();
        // Shell prompts echoed back into the stream are not output.
        if trimmed.starts_with('$') || trimmed.starts_with('#') {
            return;
        }
        self.lines.push(line.trim_end_matches('\r').to_string());
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_retains_unterminated_tail() {
        let mut seen: Vec<String> = Vec::new();
        {
            let mut receiver = MultiLineReceiver::new(|lines: &[String]| {
                seen.extend(lines.iter().cloned());
            });
            receiver.add_output("first\r\nsec");
            // Nothing complete yet: "sec" waits for its terminator.
            receiver.add_output("ond\nthird");
            receiver.flush();
        }
        assert_eq!(seen, vec!["first", "second", "third"]);
    }

    #[test]
    fn multi_line_flush_without_tail_is_silent() {
        let mut batches = 0;
        {
            let mut receiver = MultiLineReceiver::new(|_lines: &[String]| {
                batches += 1;
            });
            receiver.add_output("only\n");
            receiver.flush();
        }
        assert_eq!(batches, 1);
    }

    #[test]
    fn multi_line_keeps_interior_blank_lines() {
        let mut seen: Vec<String> = Vec::new();
        {
            let mut receiver = MultiLineReceiver::new(|lines: &[String]| {
                seen.extend(lines.iter().cloned());
            });
            receiver.add_output("a\n\nb\n");
        }
        assert_eq!(seen, vec!["a", "", "b"]);
    }

    #[test]
    fn console_skips_prompt_lines() {
        let mut receiver = ConsoleOutputReceiver::new();
        receiver.add_output("$ ls /system");
        receiver.add_output("# whoami");
        receiver.add_output("app_process");
        receiver.flush();
        assert_eq!(receiver.output(), "app_process\n");
    }

    #[test]
    fn console_raises_permission_denied_on_request() {
        let receiver = ConsoleOutputReceiver::new();
        assert!(matches!(
            receiver.throw_on_error("/dev/test: permission denied"),
            Err(AdbError::PermissionDenied(_))
        ));
        assert!(receiver.throw_on_error("Stay calm").is_ok());
    }

    #[test]
    fn console_recognises_error_patterns() {
        let receiver = ConsoleOutputReceiver::new();
        assert!(matches!(
            receiver.throw_on_error("/system/bin/sh: foo: not found"),
            Err(AdbError::FileNotFound(_))
        ));
        assert!(matches!(
            receiver.throw_on_error("ls: /nope: No such file or directory"),
            Err(AdbError::FileNotFound(_))
        ));
        assert!(matches!(
            receiver.throw_on_error("telnet: applet not found"),
            Err(AdbError::FileNotFound(_))
        ));
        assert!(matches!(
            receiver.throw_on_error("Unknown option: -z"),
            Err(AdbError::UnknownOption(_))
        ));
        assert!(matches!(
            receiver.throw_on_error("Aborting."),
            Err(AdbError::CommandAborting(_))
        ));
        assert!(matches!(
            receiver.throw_on_error("cat: /data: access denied"),
            Err(AdbError::PermissionDenied(_))
        ));
    }
}
