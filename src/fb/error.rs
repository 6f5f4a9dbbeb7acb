//! Error types for the Firebird protocol implementation.
//!
//! Server failures arrive as status vectors: a sequence of typed arguments
//! terminated by `isc_arg_end`. They are kept verbatim in [`StatusError`] so
//! callers can inspect the GDS codes and SQLSTATE, and are wrapped in
//! [`FbError::Server`] when they interrupt control flow.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for Firebird operations.
pub type FbResult<T> = Result<T, FbError>;

// ============================================================================
// GDS Codes
// ============================================================================

/// GDS status codes raised locally by the client.
pub mod isc {
    pub const ARITH_EXCEPT: i32 = 335544321;
    pub const SEGMENT: i32 = 335544366;
    pub const SEGSTR_EOF: i32 = 335544367;
    pub const CONNECT_REJECT: i32 = 335544421;
    pub const INVALID_DIMENSION: i32 = 335544458;
    pub const DSQL_SQLDA_ERR: i32 = 335544583;
    pub const NETWORK_ERROR: i32 = 335544721;
    pub const NET_READ_ERR: i32 = 335544726;
    pub const STRING_TRUNCATION: i32 = 335544914;
}

// ============================================================================
// Status Vector
// ============================================================================

/// One argument of a server status vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusArg {
    /// `isc_arg_gds`: a GDS error code
    Gds(i32),
    /// `isc_arg_string`: a string parameter for the preceding code
    Text(String),
    /// `isc_arg_number`: a numeric parameter for the preceding code
    Number(i32),
    /// `isc_arg_interpreted`: a server-formatted message
    Interpreted(String),
    /// `isc_arg_warning`: a warning code
    Warning(i32),
    /// `isc_arg_sql_state`: the SQLSTATE of the failure
    SqlState(String),
    /// Any other argument kind, with its integer payload
    Other { kind: i32, code: i32 },
}

/// A decoded status vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusError {
    pub args: Vec<StatusArg>,
}

impl StatusError {
    pub fn new(args: Vec<StatusArg>) -> Self {
        Self { args }
    }

    /// Build a single-code status raised on the client side.
    pub fn from_code(code: i32) -> Self {
        Self {
            args: vec![StatusArg::Gds(code)],
        }
    }

    /// Append a string parameter.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.args.push(StatusArg::Text(text.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// True when the vector only carries warnings.
    pub fn is_warning(&self) -> bool {
        matches!(self.args.first(), Some(StatusArg::Warning(_)))
    }

    /// The primary GDS code (first gds or warning argument).
    pub fn error_code(&self) -> i32 {
        self.args
            .iter()
            .find_map(|arg| match arg {
                StatusArg::Gds(code) | StatusArg::Warning(code) => Some(*code),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// SQLSTATE, when the server sent one.
    pub fn sql_state(&self) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            StatusArg::SqlState(state) => Some(state.as_str()),
            _ => None,
        })
    }

    /// Render a human readable message.
    ///
    /// Codes with a known local text are expanded; others are shown as
    /// `gds <code>` followed by their parameters.
    pub fn message(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for arg in &self.args {
            match arg {
                StatusArg::Gds(code) | StatusArg::Warning(code) => {
                    parts.push(match known_message(*code) {
                        Some(text) => text.to_string(),
                        None => format!("gds {}", code),
                    });
                }
                StatusArg::Text(text) | StatusArg::Interpreted(text) => {
                    parts.push(text.clone());
                }
                StatusArg::Number(n) => parts.push(n.to_string()),
                StatusArg::SqlState(_) | StatusArg::Other { .. } => {}
            }
        }
        parts.join("; ")
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;
        if let Some(state) = self.sql_state() {
            write!(f, " [SQLSTATE {}]", state)?;
        }
        Ok(())
    }
}

fn known_message(code: i32) -> Option<&'static str> {
    Some(match code {
        isc::ARITH_EXCEPT => "arithmetic exception, numeric overflow, or string truncation",
        isc::SEGMENT => "segment buffer length shorter than expected",
        isc::SEGSTR_EOF => "attempted retrieval of more segments than exist",
        isc::CONNECT_REJECT => "connection rejected by remote interface",
        isc::INVALID_DIMENSION => "column is not an array column or has too many dimensions",
        isc::DSQL_SQLDA_ERR => "invalid describe information received",
        isc::NETWORK_ERROR => "unable to complete network request to host",
        isc::NET_READ_ERR => "error reading data from the connection",
        isc::STRING_TRUNCATION => "string right truncation",
        _ => return None,
    })
}

// ============================================================================
// Error
// ============================================================================

/// Errors that can occur during Firebird operations.
#[derive(Error, Debug)]
pub enum FbError {
    /// Transport failure. Fatal to the session.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Status vector returned by the server.
    #[error("Server error: {0}")]
    Server(StatusError),

    /// Malformed or unexpected packet.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported plugin or missing credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Operation not allowed in the current state. No I/O was performed.
    #[error("Invalid state: {0}")]
    State(String),

    /// Value or descriptor mismatch.
    #[error("Type error: {0}")]
    Type(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection pool is full (max {max})")]
    PoolExhausted { max: usize },

    #[error("Connection pool is closed")]
    PoolClosed,
}

impl FbError {
    /// GDS code associated with this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            FbError::Io(_) => Some(isc::NETWORK_ERROR),
            FbError::Server(status) => Some(status.error_code()),
            _ => None,
        }
    }

    /// Shorthand for a locally raised status error.
    pub fn status(code: i32) -> Self {
        FbError::Server(StatusError::from_code(code))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FbError::Io(_) | FbError::ConnectionClosed)
    }
}

impl From<StatusError> for FbError {
    fn from(status: StatusError) -> Self {
        FbError::Server(status)
    }
}
