//! Binary grammar used over the datagram transport.
//!
//! Every datagram starts with a 3-byte header; multi-byte integers are
//! **big-endian**.
//!
//! ```text
//! +--------+--------+--------+------------------------------
//! |  type  |   message id    |  kind-specific body ...
//! +--------+--------+--------+------------------------------
//! ```
//!
//! | kind    | tag  | body                                                  |
//! |---------|------|-------------------------------------------------------|
//! | CONFIRM | 0x00 | none, the header id is the acknowledged id            |
//! | REPLY   | 0x01 | result(1) ref_id(2) content\0                         |
//! | AUTH    | 0x02 | username\0 display_name\0 secret\0                    |
//! | JOIN    | 0x03 | channel_id\0 display_name\0                           |
//! | MSG     | 0x04 | display_name\0 content\0                              |
//! | PING    | 0xFD | none                                                  |
//! | ERR     | 0xFE | display_name\0 content\0                              |
//! | BYE     | 0xFF | display_name\0                                        |

use crate::{
    error::{DecodeError, EncodeError},
    message::{Body, Field, Message, MessageId, MessageKind},
};

pub const HEADER_LEN: usize = 3;

pub mod tag {
    pub const CONFIRM: u8 = 0x00;
    pub const REPLY: u8 = 0x01;
    pub const AUTH: u8 = 0x02;
    pub const JOIN: u8 = 0x03;
    pub const MSG: u8 = 0x04;
    pub const PING: u8 = 0xFD;
    pub const ERR: u8 = 0xFE;
    pub const BYE: u8 = 0xFF;
}

/// The fixed part every datagram shares, readable even when the body is garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: u8,
    pub id: MessageId,
}

impl Header {
    pub fn kind(&self) -> Option<MessageKind> {
        kind_for_tag(self.tag)
    }
}

pub fn kind_for_tag(tag: u8) -> Option<MessageKind> {
    let kind = match tag {
        tag::CONFIRM => MessageKind::Confirm,
        tag::REPLY => MessageKind::Reply,
        tag::AUTH => MessageKind::Auth,
        tag::JOIN => MessageKind::Join,
        tag::MSG => MessageKind::Msg,
        tag::PING => MessageKind::Ping,
        tag::ERR => MessageKind::Err,
        tag::BYE => MessageKind::Bye,
        _ => return None,
    };
    Some(kind)
}

pub fn tag_for_kind(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Confirm => tag::CONFIRM,
        MessageKind::Reply => tag::REPLY,
        MessageKind::Auth => tag::AUTH,
        MessageKind::Join => tag::JOIN,
        MessageKind::Msg => tag::MSG,
        MessageKind::Ping => tag::PING,
        MessageKind::Err => tag::ERR,
        MessageKind::Bye => tag::BYE,
    }
}

pub fn peek_header(datagram: &[u8]) -> Result<Header, DecodeError> {
    if datagram.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedHeader(datagram.len()));
    }
    Ok(Header {
        tag: datagram[0],
        id: u16::from_be_bytes([datagram[1], datagram[2]]),
    })
}

pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let kind = message.kind();
    let id = match &message.body {
        Body::Confirm { ref_id } => *ref_id,
        _ => message.id.ok_or(EncodeError::MissingId(kind))?,
    };

    let mut buf = Vec::with_capacity(HEADER_LEN + 32);
    buf.push(tag_for_kind(kind));
    buf.extend_from_slice(&id.to_be_bytes());

    match &message.body {
        Body::Auth {
            username,
            display_name,
            secret,
        } => {
            put_str(&mut buf, username);
            put_str(&mut buf, display_name);
            put_str(&mut buf, secret);
        }
        Body::Join {
            channel_id,
            display_name,
        } => {
            put_str(&mut buf, channel_id);
            put_str(&mut buf, display_name);
        }
        Body::Msg {
            display_name,
            content,
        }
        | Body::Err {
            display_name,
            content,
        } => {
            put_str(&mut buf, display_name);
            put_str(&mut buf, content);
        }
        Body::Bye { display_name } => put_str(&mut buf, display_name),
        Body::Reply {
            success,
            content,
            ref_id,
        } => {
            let ref_id = ref_id.ok_or(EncodeError::MissingRefId)?;
            buf.push(u8::from(*success));
            buf.extend_from_slice(&ref_id.to_be_bytes());
            put_str(&mut buf, content);
        }
        Body::Confirm { .. } | Body::Ping => {}
    }

    Ok(buf)
}

pub fn decode(datagram: &[u8]) -> Result<Message, DecodeError> {
    let header = peek_header(datagram)?;
    let kind = header.kind().ok_or(DecodeError::UnknownType(header.tag))?;
    let mut body = BodyReader {
        kind,
        rest: &datagram[HEADER_LEN..],
    };

    let message = match kind {
        MessageKind::Confirm => Message::confirm(header.id),
        MessageKind::Ping => Message::ping(),
        MessageKind::Reply => {
            let success = match body.byte()? {
                0 => false,
                1 => true,
                other => return Err(DecodeError::InvalidResult(other)),
            };
            let ref_id = u16::from_be_bytes([body.byte()?, body.byte()?]);
            let content = body.string(Field::Content)?;
            Message::reply(success, content, Some(ref_id))?
        }
        MessageKind::Auth => {
            let username = body.string(Field::Username)?;
            let display_name = body.string(Field::DisplayName)?;
            let secret = body.string(Field::Secret)?;
            Message::auth(username, secret, display_name)?
        }
        MessageKind::Join => {
            let channel_id = body.string(Field::ChannelId)?;
            let display_name = body.string(Field::DisplayName)?;
            Message::join(channel_id, display_name)?
        }
        MessageKind::Msg => {
            let display_name = body.string(Field::DisplayName)?;
            let content = body.string(Field::Content)?;
            Message::msg(display_name, content)?
        }
        MessageKind::Err => {
            let display_name = body.string(Field::DisplayName)?;
            let content = body.string(Field::Content)?;
            Message::err(display_name, content)?
        }
        MessageKind::Bye => {
            let display_name = body.string(Field::DisplayName)?;
            Message::bye(display_name)?
        }
    };

    if !body.rest.is_empty() {
        return Err(DecodeError::TrailingBytes(body.rest.len()));
    }

    Ok(message.with_id(header.id))
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

struct BodyReader<'a> {
    kind: MessageKind,
    rest: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let (first, rest) = self
            .rest
            .split_first()
            .ok_or(DecodeError::TruncatedBody { kind: self.kind })?;
        self.rest = rest;
        Ok(*first)
    }

    fn string(&mut self, field: Field) -> Result<&'a str, DecodeError> {
        let nul = self
            .rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::MissingTerminator(field))?;
        let raw = &self.rest[..nul];
        self.rest = &self.rest[nul + 1..];
        if !raw.is_ascii() {
            return Err(DecodeError::NotAscii);
        }
        std::str::from_utf8(raw).map_err(|_| DecodeError::NotAscii)
    }
}
