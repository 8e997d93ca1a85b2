//! Error types for decoding documents and applying patches.

use std::fmt;

/// Errors raised at the codec boundary. Nothing is committed when one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Malformed markup or a structural violation (missing id, stray root, ...).
    Format(String),
    /// The root element is not one this codec understands.
    UnsupportedFormat(String),
    /// A recognized but unhandled construct, such as a compressed diagram payload.
    UnsupportedElement(String),
    /// Serialization failed.
    Write(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Format(msg) => write!(f, "format error: {msg}"),
            CodecError::UnsupportedFormat(root) => {
                write!(f, "unsupported document root <{root}>")
            }
            CodecError::UnsupportedElement(msg) => write!(f, "unsupported element: {msg}"),
            CodecError::Write(msg) => write!(f, "write error: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors raised while decoding or applying a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The JSON wire form is not a valid patch.
    Wire(String),
    /// An insert payload failed to decode.
    Codec(CodecError),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::Wire(msg) => write!(f, "invalid patch: {msg}"),
            PatchError::Codec(e) => write!(f, "invalid insert payload: {e}"),
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PatchError::Codec(e) => Some(e),
            PatchError::Wire(_) => None,
        }
    }
}

impl From<CodecError> for PatchError {
    fn from(e: CodecError) -> Self {
        PatchError::Codec(e)
    }
}

impl From<serde_json::Error> for PatchError {
    fn from(e: serde_json::Error) -> Self {
        PatchError::Wire(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = CodecError::UnsupportedFormat("svg".into());
        assert_eq!(e.to_string(), "unsupported document root <svg>");

        let p: PatchError = CodecError::Format("empty document".into()).into();
        assert_eq!(p.to_string(), "invalid insert payload: format error: empty document");
    }
}
