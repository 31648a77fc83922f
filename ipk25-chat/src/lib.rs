//! Terminal chat client speaking the IPK25-CHAT protocol over TCP or UDP.
//!
//! The same message model runs over two wire encodings: a CRLF-delimited
//! text grammar on a TCP stream, and a binary grammar on UDP datagrams with
//! its own confirmation and retransmission layer. Each module focuses on a
//! concrete responsibility:
//!
//! - [`message`] defines the message kinds and the field validation rules.
//! - [`stream_codec`] and [`datagram_codec`] translate messages to and from
//!   the two wire grammars.
//! - [`state`] holds the client state machine shared by both transports.
//! - [`command`] turns typed lines into messages or local actions.
//! - [`console`] renders notices for stdout and collects local input events.
//! - [`stream_session`] and [`datagram_session`] drive one session per
//!   transport; [`session`] holds the pieces they share.
//! - [`cli`] and [`client`] parse arguments and wire everything together.
//!
//! Integration tests drive the sessions against scripted in-process servers.

pub mod cli;
pub mod client;
pub mod command;
pub mod console;
pub mod datagram_codec;
pub mod datagram_session;
pub mod error;
pub mod message;
pub mod session;
pub mod state;
pub mod stream_codec;
pub mod stream_session;
