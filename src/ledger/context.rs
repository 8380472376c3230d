//! Caller-supplied context for finalizing an outbound request.
//!
//! When a frame names an id the ledger does not know, the context is only
//! used to describe the frame in the diagnostic log.

use crate::ledger::request::RequestId;

/// Bytes of a buffered `arg1` kept in the log.
pub const ARG1_LOG_LIMIT: usize = 256;

/// The frame that triggered `pop_out_req`.
#[derive(Debug, Clone, Default)]
pub enum PopContext {
    #[default]
    None,
    Error(ErrorContext),
    Response(ResponseContext),
}

/// An error frame from the peer.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub original_id: RequestId,
    pub code: u8,
    pub message: String,
}

/// A call response frame from the peer.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub id: RequestId,
    pub code: u8,
    pub arg1: Arg1,
}

/// First argument of a response: either fully buffered or still streaming.
#[derive(Debug, Clone)]
pub enum Arg1 {
    Buffered(Vec<u8>),
    Streamed,
}

impl Arg1 {
    /// Loggable rendering, truncated to [`ARG1_LOG_LIMIT`] bytes.
    pub fn describe(&self) -> String {
        match self {
            Arg1::Buffered(bytes) => {
                let end = bytes.len().min(ARG1_LOG_LIMIT);
                let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
                if bytes.len() > ARG1_LOG_LIMIT {
                    text.push_str("...");
                }
                text
            }
            Arg1::Streamed => "streamed-arg1".to_string(),
        }
    }
}

impl PopContext {
    /// Metric label for the kind of frame.
    pub fn kind(&self) -> &'static str {
        match self {
            PopContext::None => "none",
            PopContext::Error(_) => "error",
            PopContext::Response(_) => "response",
        }
    }

    /// Short classification used in the unknown-id log line.
    pub fn info(&self) -> Option<&'static str> {
        match self {
            PopContext::None => None,
            PopContext::Error(_) => Some("got error frame for unknown id"),
            PopContext::Response(_) => Some("got call response for unknown id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_arg1_is_truncated() {
        let arg1 = Arg1::Buffered(vec![b'a'; ARG1_LOG_LIMIT + 10]);
        let text = arg1.describe();
        assert!(text.ends_with("..."));
        assert_eq!(text.len(), ARG1_LOG_LIMIT + 3);

        assert_eq!(Arg1::Buffered(b"echo".to_vec()).describe(), "echo");
        assert_eq!(Arg1::Streamed.describe(), "streamed-arg1");
    }

    #[test]
    fn classification_follows_variant() {
        let err = PopContext::Error(ErrorContext {
            original_id: RequestId::from(3),
            code: 0x03,
            message: "busy".into(),
        });
        assert_eq!(err.info(), Some("got error frame for unknown id"));
        assert_eq!(err.kind(), "error");
        assert_eq!(PopContext::None.info(), None);
    }
}
