//! Error types for demeter-core

use std::fmt::Write;
use std::time::Duration;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Main error type for demeter-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Session establishment errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Connection(err) => Some(err.remediation()),
            Self::Logging(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Check log directory", "ls -ld ./logs")
                    .alternative("Pass --log-file with a writable location."),
            ),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Whether the document could not be obtained at all (as opposed to
    /// being obtained and rejected).
    #[must_use]
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::ReadFailed(..))
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => {
                Remediation::new("Config parse failed. Fix the syntax and retry.")
                    .command("Validate JSON", "python -m json.tool < conf.json")
                    .alternative("Check for trailing commas or a misspelled key.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .alternative(
                        "The Neo4j url must use http:// or https://: replace the Bolt port 7687 with 7474 (http) or 7473 (https).",
                    )
                    .alternative("refreshRate is in milliseconds and must be positive.")
            }
        }
    }
}

/// Errors raised while establishing a database session
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Neo4j is unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Neo4j rejected the credentials for user {0}")]
    Unauthorized(String),

    #[error("Connection probe timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidEndpoint { url, .. } => {
                Remediation::new(format!("Fix the Neo4j url in the configuration: {url}"))
                    .alternative("Use the HTTP endpoint, e.g. http://localhost:7474.")
            }
            Self::Client(_) => Remediation::new("The HTTP client could not be created.")
                .alternative("Check the TLS setup of the host."),
            Self::Unreachable { url, .. } => {
                Remediation::new(format!("Make sure Neo4j is running and reachable at {url}."))
                    .command("Probe endpoint", format!("curl -i {url}"))
                    .alternative("The watchdog retries on the next cycle.")
            }
            Self::Unauthorized(user) => {
                Remediation::new(format!("Verify the password configured for '{user}'."))
                    .alternative("Reset the password with neo4j-admin if it was lost.")
            }
            Self::Timeout(_) => Remediation::new("Neo4j did not answer the connection probe.")
                .alternative("Raise watchdog.callTimeoutMs or check server load."),
        }
    }
}

/// Errors raised by a query or procedure call on an established session
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{code}: {message}")]
    Server { code: String, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_have_remediation() {
        let errors = vec![
            Error::Config(ConfigError::FileNotFound("conf.json".to_string())),
            Error::Config(ConfigError::ReadFailed(
                "conf.json".to_string(),
                "denied".to_string(),
            )),
            Error::Config(ConfigError::ParseFailed("eof".to_string())),
            Error::Config(ConfigError::ValidationError("refreshRate".to_string())),
            Error::Connection(ConnectionError::Unauthorized("neo4j".to_string())),
            Error::Connection(ConnectionError::Timeout(Duration::from_secs(3))),
        ];

        for err in errors {
            let remediation = err.remediation().expect("remediation");
            assert!(!remediation.summary.is_empty(), "{err}");
        }
    }

    #[test]
    fn unreadable_config_is_distinguished_from_invalid() {
        assert!(ConfigError::FileNotFound("a".into()).is_unreadable());
        assert!(ConfigError::ReadFailed("a".into(), "b".into()).is_unreadable());
        assert!(!ConfigError::ParseFailed("a".into()).is_unreadable());
        assert!(!ConfigError::ValidationError("a".into()).is_unreadable());
    }

    #[test]
    fn server_error_display_keeps_code() {
        let err = QueryError::Server {
            code: "Neo.ClientError.Procedure.ProcedureNotFound".to_string(),
            message: "There is no procedure with the name `demeter.groupTags`".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("Neo.ClientError.Procedure.ProcedureNotFound"));
        assert!(text.contains("demeter.groupTags"));
    }

    #[test]
    fn format_error_includes_remediation() {
        let err = Error::Config(ConfigError::FileNotFound("conf.json".to_string()));
        let rendered = format_error_with_remediation(&err);
        assert!(rendered.starts_with("Error: Config error: Config file not found: conf.json"));
        assert!(rendered.contains("To fix:"));
        assert!(rendered.contains("--config"));
    }

    #[test]
    fn render_plain_lists_commands_and_alternatives() {
        let text = Remediation::new("Do the thing")
            .command("Check", "ls")
            .alternative("Or not")
            .render_plain();
        assert!(text.contains("    - Check: ls"));
        assert!(text.contains("    - Or not"));
    }
}
