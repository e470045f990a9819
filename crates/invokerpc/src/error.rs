//! # Error Definitions
//!
//! `Error` covers failures of the protocol machinery itself: bytes that do not
//! decode, envelopes that break their own invariants, calls built with
//! arguments that do not match their declared types.
//!
//! `Fault` is different: it describes the *remote side* failing to run a call.
//! Faults travel inside reply envelopes as ordinary data.

use std::fmt;

use crate::envelope::NodeId;
use crate::value::TypeTag;

/// Protocol and codec failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying wirepack encoding failed.
    Serialization(wirepack::Error),
    /// The structure of a frame was malformed (missing or contradictory fields).
    ProtocolViolation(String),
    /// An unknown frame, type tag or fault kind was encountered.
    UnknownVariant(String),
    /// The frame was written by an incompatible protocol version.
    UnsupportedVersion(u8),
    /// An envelope was constructed with `needs_reply` disagreeing with its id.
    InvariantViolation(&'static str),
    /// Argument values do not line up with the declared argument types.
    ArgumentMismatch(String),
    /// Values nested deeper than the codec allows.
    RecursionLimitExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::UnsupportedVersion(v) => write!(f, "unsupported protocol version {}", v),
            Self::InvariantViolation(msg) => write!(f, "invalid envelope: {}", msg),
            Self::ArgumentMismatch(msg) => write!(f, "argument mismatch: {}", msg),
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds recursion limit"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Serialization(e)
    }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a remote invocation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// No remote with this name was registered on the receiving node.
    UnknownRemote { name: String },
    /// The remote exists but no overload matches the argument types.
    NoMatchingMethod { remote: String, method: String, arg_types: Vec<TypeTag> },
    /// The method ran and failed.
    Execution { message: String },
    /// The recipient disconnected before it replied.
    RecipientGone { node: NodeId },
    /// The recipient could not make sense of the call.
    Protocol { message: String },
}

impl Fault {
    /// Wire name of the fault kind.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::UnknownRemote { .. } => "UnknownRemote",
            Self::NoMatchingMethod { .. } => "NoMatchingMethod",
            Self::Execution { .. } => "Execution",
            Self::RecipientGone { .. } => "RecipientGone",
            Self::Protocol { .. } => "Protocol",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRemote { name } => write!(f, "no remote named '{}'", name),
            Self::NoMatchingMethod { remote, method, arg_types } => {
                write!(f, "no method {}.{}(", remote, method)?;
                for (i, ty) in arg_types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                write!(f, ")")
            }
            Self::Execution { message } => write!(f, "remote method failed: {}", message),
            Self::RecipientGone { node } => write!(f, "{} disconnected before replying", node),
            Self::Protocol { message } => write!(f, "remote rejected call: {}", message),
        }
    }
}

impl std::error::Error for Fault {}
