//! Error type for the replication layer.

use drawsync_core::{CodecError, PatchError};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CollabError {
    /// Update or state-vector bytes could not be decoded.
    Decode(String),
    /// A decoded update could not be integrated.
    Update(String),
    Patch(PatchError),
    Codec(CodecError),
}

impl fmt::Display for CollabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollabError::Decode(msg) => write!(f, "decode error: {msg}"),
            CollabError::Update(msg) => write!(f, "update error: {msg}"),
            CollabError::Patch(e) => write!(f, "{e}"),
            CollabError::Codec(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CollabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollabError::Patch(e) => Some(e),
            CollabError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PatchError> for CollabError {
    fn from(e: PatchError) -> Self {
        CollabError::Patch(e)
    }
}

impl From<CodecError> for CollabError {
    fn from(e: CodecError) -> Self {
        CollabError::Codec(e)
    }
}

impl From<yrs::encoding::read::Error> for CollabError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        CollabError::Decode(e.to_string())
    }
}
