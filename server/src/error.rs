//! Error types for the server orchestration layer.

/// Failures that stop a server operation from completing.
///
/// None of these terminate the process; callers log them and carry on, or
/// surface them from `main` during startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} listener already started")]
    AlreadyStarted(&'static str),

    #[error("Handler for packet type '{0}' registered twice")]
    DuplicateHandler(String),
}

/// Registry insertion failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Client {0} is already registered")]
    Duplicate(String),
}
