//! Error types for the query engine.
//!
//! Every failure the engine can produce is a distinct variant; execution
//! paths return a `Result` instead of unwinding. Parse and shape errors
//! are raised before any I/O, so a rejected query never leaves a
//! half-written table behind.

/// The main error type for jsondb.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("authentication failed on server '{0}'")]
    Auth(String),

    #[error("column '{0}' is not nullable")]
    NotNull(String),

    #[error("cannot coerce '{value}' to {expected} for column '{column}'")]
    BadType {
        column: String,
        value: String,
        expected: String,
    },

    #[error("no row of '{table}' matches link value '{value}' on column '{column}'")]
    LinkMiss {
        table: String,
        column: String,
        value: String,
    },

    #[error("{on} on() target(s) for {link} link() projection(s)")]
    LinkArityMismatch { on: usize, link: usize },

    #[error("duplicate primary key value in table '{0}'")]
    DupPrimary(String),

    #[error("duplicate value on unique key '{0}'")]
    DupUnique(String),

    #[error("expected {expected} value(s), got {got}")]
    Arity { expected: usize, got: usize },

    #[error("unknown column '{0}'")]
    UnknownField(String),

    #[error("unsupported operator in '{0}'")]
    BadOperator(String),

    #[error("unknown function '{0}'")]
    UnknownFn(String),

    #[error("function '{name}' takes {expected} argument(s), got {got}")]
    FnArity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt table document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("timed out waiting for lock on '{0}'")]
    LockTimeout(String),

    #[error("update requires a with() extension")]
    MissingWith,

    #[error("no database selected")]
    NoDatabase,

    #[error("database '{0}' does not exist")]
    UnknownDatabase(String),

    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown extension '{0}'")]
    UnknownExtension(String),
}

impl Error {
    /// Shorthand for a parse error with a formatted message.
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}
