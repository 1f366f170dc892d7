//! Where failures go once the library hands them back.

use std::io::{self, Write};

use colored::Colorize;

use crate::error::BindError;
use crate::validate::Violations;

/// Receives fatal build errors and validation results.
pub trait ErrorSink {
    /// A build that could not complete. `source` names the input, if any.
    fn report_fatal(&mut self, source: Option<&str>, error: &BindError);

    /// Every violation of one validated graph.
    fn report_violations(&mut self, source: Option<&str>, violations: &Violations);

    /// Whether anything has been reported so far.
    fn failed(&self) -> bool;
}

/// Writes reports to a stream, `ERROR:`-prefixed and coloured unless
/// `NO_COLOR` is set.
pub struct ConsoleSink<W: Write = io::Stderr> {
    out: W,
    failures: usize,
}

impl ConsoleSink {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        if std::env::var_os("NO_COLOR").is_some() {
            colored::control::set_override(false);
        }
        Self { out, failures: 0 }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, source: Option<&str>, message: &str) {
        let prefix = "ERROR:".red().bold();
        let _ = match source {
            Some(source) => writeln!(self.out, "{prefix} {}: {message}", source.bold()),
            None => writeln!(self.out, "{prefix} {message}"),
        };
    }
}

impl<W: Write> ErrorSink for ConsoleSink<W> {
    fn report_fatal(&mut self, source: Option<&str>, error: &BindError) {
        self.failures += 1;
        tracing::error!(source = source.unwrap_or("-"), %error, "build failed");
        self.line(source, &error.to_string());
    }

    fn report_violations(&mut self, source: Option<&str>, violations: &Violations) {
        if violations.is_empty() {
            return;
        }
        self.failures += 1;
        tracing::error!(
            source = source.unwrap_or("-"),
            count = violations.len(),
            "validation failed"
        );
        for violation in violations {
            self.line(source, &violation.to_string());
        }
    }

    fn failed(&self) -> bool {
        self.failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_sink_prefixes_and_counts() {
        colored::control::set_override(false);
        let mut sink = ConsoleSink::new(Vec::new());
        assert!(!sink.failed());
        sink.report_fatal(Some("a.json"), &BindError::malformed("empty"));
        sink.report_violations(Some("b.json"), &Violations::default());
        assert_eq!(sink.failures(), 1);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "ERROR: a.json: malformed input: empty\n");
    }
}
