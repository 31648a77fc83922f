use std::io;

use thiserror::Error;

use crate::{
    message::{Field, MessageId, MessageKind},
    state::ClientState,
};

/// A field broke the protocol's length or alphabet rules; nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldValidationError {
    #[error("{field} must not be empty")]
    Empty { field: Field },

    #[error("{field} is {len} characters long, at most {max} allowed")]
    TooLong { field: Field, len: usize, max: usize },

    #[error("{field} contains invalid character {ch:?}")]
    InvalidCharacter { field: Field, ch: char },
}

/// An inbound frame or datagram could not be turned into a [`crate::message::Message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the 3-byte header")]
    TruncatedHeader(usize),

    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    #[error("{kind} body ended early")]
    TruncatedBody { kind: MessageKind },

    #[error("{0} is missing its NUL terminator")]
    MissingTerminator(Field),

    #[error("{0} unexpected bytes after the last field")]
    TrailingBytes(usize),

    #[error("invalid REPLY result byte {0}")]
    InvalidResult(u8),

    #[error("frame contains non-ASCII bytes")]
    NotAscii,

    #[error("unrecognised frame {0:?}")]
    UnknownPrefix(String),

    #[error("{kind} frame is missing {infix:?}")]
    MissingInfix {
        kind: MessageKind,
        infix: &'static str,
    },

    #[error("frame exceeds {0} bytes without a terminator")]
    FrameTooLong(usize),

    #[error(transparent)]
    InvalidField(#[from] FieldValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{0} has no message id")]
    MissingId(MessageKind),

    #[error("REPLY has no reference id")]
    MissingRefId,

    #[error("{0} cannot be sent over the stream transport")]
    NotStreamable(MessageKind),
}

/// Local mistakes that never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("unknown command {0}, try /help")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    WrongArguments(&'static str),

    #[error("cannot send {kind} in {state} state")]
    NotAllowed { kind: MessageKind, state: ClientState },

    #[error("no display name set, use /auth first")]
    NoDisplayName,

    #[error(transparent)]
    InvalidField(#[from] FieldValidationError),
}

/// The peer sent a message kind that is illegal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {kind} in {state} state")]
pub struct ProtocolViolation {
    pub kind: MessageKind,
    pub state: ClientState,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Violation(#[from] ProtocolViolation),

    #[error("malformed message from server: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("message {id} was not confirmed after {retries} retransmissions")]
    RetryExhausted { id: MessageId, retries: u8 },

    #[error("server reported an error: {content}")]
    ServerError {
        display_name: String,
        content: String,
    },
}
