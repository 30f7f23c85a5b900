//! Error kinds for agentbench operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on ErrorKind to decide how to handle specific cases. The
/// agent loop in particular turns the tool dispatch kinds into tool-result
/// text instead of aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    // =========================================================================
    // Tool dispatch errors
    // =========================================================================
    /// The model asked for a tool that is not registered
    UnknownTool,

    /// Tool call arguments were not a JSON object
    ArgumentParse,

    /// The tool itself failed
    ToolExecution,

    // =========================================================================
    // Provider errors
    // =========================================================================
    /// The model provider could not start or continue a response
    Transport,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// Credentials rejected by the provider
    AuthenticationFailed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Data errors
    // =========================================================================
    /// Serialization/deserialization failed
    SerializationFailed,

    /// Failed to parse input
    ParseFailed,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Task errors
    // =========================================================================
    /// A deadline elapsed before the task finished
    Timeout,

    /// The grader could not evaluate the run
    GradingFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",

            // Tool dispatch
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::ArgumentParse => "ArgumentParse",
            ErrorKind::ToolExecution => "ToolExecution",

            // Provider
            ErrorKind::Transport => "Transport",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Data
            ErrorKind::SerializationFailed => "SerializationFailed",
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Task
            ErrorKind::Timeout => "Timeout",
            ErrorKind::GradingFailed => "GradingFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
                | ErrorKind::Timeout
        )
    }

    /// Kinds produced by tool dispatch. These are reported back to the model
    /// and never end a run.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownTool | ErrorKind::ArgumentParse | ErrorKind::ToolExecution
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
