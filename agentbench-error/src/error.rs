//! The main Error type for agentbench

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all agentbench operations.
///
/// This error type provides:
/// - `kind`: What type of error occurred
/// - `message`: Human-readable description
/// - `status`: Whether the error is retryable
/// - `operation`: What operation caused the error
/// - `context`: Key-value pairs for debugging
/// - `source`: The underlying error (if any)
///
/// # Example
///
/// ```rust
/// use agentbench_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::Transport, "connection reset")
///     .with_operation("agent::round")
///     .with_status(ErrorStatus::Temporary)
///     .with_context("model", "llama-3.3-70b-versatile")
///     .with_context("round", "3");
///
/// assert_eq!(err.kind(), ErrorKind::Transport);
/// assert!(err.status().is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error status
    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Get the operation that caused this error
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Get the context key-value pairs
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up a single context value by key
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get the source error (if any)
    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    /// Set the error status
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// If an operation was already set, the previous one is moved to context
    /// as "called" to preserve the call chain.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.context.is_empty() {
            write!(f, ", context {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "    Source: {:?}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Convenient From implementations (be careful not to leak raw errors!)
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    /// Create an Unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Create a ConfigInvalid error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// The model asked for a tool that is not registered.
    ///
    /// The message is written for the model: it ends up as tool-result text.
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownTool, format!("Unknown tool name: {}", name))
            .with_context("tool", name)
    }

    /// Tool call arguments could not be parsed into keyword arguments
    pub fn argument_parse(
        tool: impl Into<String>,
        raw: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        let tool = tool.into();
        let raw = raw.into();
        Self::new(
            ErrorKind::ArgumentParse,
            format!(
                "Invalid arguments for tool '{}': {} (raw arguments: {})",
                tool, reason, raw
            ),
        )
        .with_context("tool", tool)
        .with_context("arguments", raw)
    }

    /// A tool ran and failed
    pub fn tool_execution(tool: impl Into<String>, description: impl Into<String>) -> Self {
        let tool = tool.into();
        let description = description.into();
        Self::new(
            ErrorKind::ToolExecution,
            format!("Error in tool '{}': {}", tool, description),
        )
        .with_context("tool", tool)
    }

    /// The model provider failed
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create a ParseFailed error
    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
    }

    /// Create a SerializationFailed error
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }

    /// Create an IoFailed error
    pub fn io_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailed, message)
    }

    /// Create a NetworkFailed error
    pub fn network_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailed, message)
    }

    /// Create a Timeout error
    pub fn timeout(seconds: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("deadline of {}s elapsed", seconds))
            .with_context("seconds", seconds.to_string())
    }
}
