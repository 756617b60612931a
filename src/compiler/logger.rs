//! Compile diagnostics
//!
//! The compiler never throws mid-lowering: it logs a message, poisons
//! the offending value and keeps going. The accumulated list is
//! queryable with source locations for IDE/editor integration, and
//! every message is mirrored to `tracing`.

use serde::Serialize;

use crate::lexer::SourceSpan;

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Developer diagnostics
    Debug,
    /// Informational
    Info,
    /// Something suspicious, compilation continues
    Warning,
    /// Compilation will not produce a module
    Error,
}

/// Stable codes for compile diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum LogCode {
    Generic,
    ParseError,
    UnknownType,
    UnknownSymbol,
    UnknownModule,
    UnknownFunction,
    UnknownProperty,
    TypeMismatch,
    NoDefaultConstructor,
    FunctionMustReturnAValue,
    ThisOutsideClass,
    NotCallable,
    NotAssignable,
    DuplicateSymbol,
    TemplateArgumentMismatch,
    Internal,
}

/// One logged diagnostic
#[derive(Debug, Clone, Serialize)]
pub struct LogMessage {
    /// Severity
    pub severity: Severity,
    /// Stable code
    pub code: LogCode,
    /// Source location
    pub span: SourceSpan,
    /// Rendered message
    pub message: String,
}

/// Accumulating diagnostic log.
#[derive(Debug, Default)]
pub struct Logger {
    messages: Vec<LogMessage>,
}

impl Logger {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a message.
    pub fn submit(&mut self, severity: Severity, code: LogCode, span: SourceSpan, message: String) {
        match severity {
            Severity::Debug => tracing::debug!(?code, %span, "{message}"),
            Severity::Info => tracing::info!(?code, %span, "{message}"),
            Severity::Warning => tracing::warn!(?code, %span, "{message}"),
            Severity::Error => tracing::error!(?code, %span, "{message}"),
        }
        self.messages.push(LogMessage {
            severity,
            code,
            span,
            message,
        });
    }

    /// Log an error.
    pub fn error(&mut self, code: LogCode, span: SourceSpan, message: impl Into<String>) {
        self.submit(Severity::Error, code, span, message.into());
    }

    /// Log a warning.
    pub fn warn(&mut self, code: LogCode, span: SourceSpan, message: impl Into<String>) {
        self.submit(Severity::Warning, code, span, message.into());
    }

    /// Log a debug message.
    pub fn debug(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.submit(Severity::Debug, LogCode::Generic, span, message.into());
    }

    /// All messages in submission order.
    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    /// Messages with severity `Error`.
    pub fn errors(&self) -> impl Iterator<Item = &LogMessage> {
        self.messages
            .iter()
            .filter(|m| m.severity == Severity::Error)
    }

    /// Number of errors logged.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Whether any error was logged.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Serialize the message list as JSON for editor integrations.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_errors() {
        let mut log = Logger::new();
        log.warn(LogCode::Generic, SourceSpan::default(), "hm");
        assert!(!log.has_errors());
        log.error(LogCode::UnknownType, SourceSpan::default(), "no such type");
        assert_eq!(log.error_count(), 1);
        assert_eq!(log.messages().len(), 2);
    }

    #[test]
    fn exports_json() {
        let mut log = Logger::new();
        log.error(LogCode::TypeMismatch, SourceSpan::new(3, 7, 1), "bad");
        let json = log.to_json();
        assert!(json.contains("TypeMismatch"));
        assert!(json.contains("\"line\":3"));
    }
}
