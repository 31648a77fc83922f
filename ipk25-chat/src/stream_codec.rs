//! Text grammar used over the reliable stream transport.
//!
//! Each frame is one line of ASCII terminated by `\r\n`:
//!
//! ```text
//! AUTH <username> AS <displayName> USING <secret>
//! JOIN <channelId> AS <displayName>
//! MSG FROM <displayName> IS <content>
//! ERR FROM <displayName> IS <content>
//! BYE FROM <displayName>
//! REPLY OK IS <content>
//! REPLY NOK IS <content>
//! ```
//!
//! Keywords are case-sensitive. CONFIRM and PING only exist on the datagram
//! transport and are rejected by [`encode`].

use crate::{
    error::{DecodeError, EncodeError},
    message::{Body, Message, MessageKind},
};

pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

const AS: &str = " AS ";
const IS: &str = " IS ";
const USING: &str = " USING ";

/// Renders `message` as a complete `\r\n`-terminated frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let line = match &message.body {
        Body::Auth {
            username,
            display_name,
            secret,
        } => format!("AUTH {username} AS {display_name} USING {secret}"),
        Body::Join {
            channel_id,
            display_name,
        } => format!("JOIN {channel_id} AS {display_name}"),
        Body::Msg {
            display_name,
            content,
        } => format!("MSG FROM {display_name} IS {content}"),
        Body::Err {
            display_name,
            content,
        } => format!("ERR FROM {display_name} IS {content}"),
        Body::Bye { display_name } => format!("BYE FROM {display_name}"),
        Body::Reply {
            success, content, ..
        } => {
            let result = if *success { "OK" } else { "NOK" };
            format!("REPLY {result} IS {content}")
        }
        Body::Confirm { .. } | Body::Ping => {
            return Err(EncodeError::NotStreamable(message.kind()));
        }
    };

    let mut frame = line.into_bytes();
    frame.extend_from_slice(FRAME_TERMINATOR);
    Ok(frame)
}

/// Parses one frame; a trailing `\r\n` is optional.
pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
    let frame = frame.strip_suffix(FRAME_TERMINATOR).unwrap_or(frame);
    if !frame.is_ascii() {
        return Err(DecodeError::NotAscii);
    }
    let line = std::str::from_utf8(frame).map_err(|_| DecodeError::NotAscii)?;

    if let Some(rest) = line.strip_prefix("REPLY OK IS ") {
        return Ok(Message::reply(true, rest, None)?);
    }
    if let Some(rest) = line.strip_prefix("REPLY NOK IS ") {
        return Ok(Message::reply(false, rest, None)?);
    }
    if let Some(rest) = line.strip_prefix("MSG FROM ") {
        let (display_name, content) = split_infix(rest, IS, MessageKind::Msg)?;
        return Ok(Message::msg(display_name, content)?);
    }
    if let Some(rest) = line.strip_prefix("ERR FROM ") {
        let (display_name, content) = split_infix(rest, IS, MessageKind::Err)?;
        return Ok(Message::err(display_name, content)?);
    }
    if let Some(rest) = line.strip_prefix("BYE FROM ") {
        return Ok(Message::bye(rest)?);
    }
    if let Some(rest) = line.strip_prefix("JOIN ") {
        let (channel_id, display_name) = split_infix(rest, AS, MessageKind::Join)?;
        return Ok(Message::join(channel_id, display_name)?);
    }
    if let Some(rest) = line.strip_prefix("AUTH ") {
        let (username, rest) = split_infix(rest, AS, MessageKind::Auth)?;
        let (display_name, secret) = split_infix(rest, USING, MessageKind::Auth)?;
        return Ok(Message::auth(username, secret, display_name)?);
    }

    Err(DecodeError::UnknownPrefix(truncate_for_report(line)))
}

fn split_infix<'a>(
    text: &'a str,
    infix: &'static str,
    kind: MessageKind,
) -> Result<(&'a str, &'a str), DecodeError> {
    text.split_once(infix)
        .ok_or(DecodeError::MissingInfix { kind, infix })
}

fn truncate_for_report(line: &str) -> String {
    line.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CONTENT_MAX, DISPLAY_NAME_MAX};

    fn roundtrip(message: Message) {
        let frame = encode(&message).expect("encode");
        assert!(frame.ends_with(FRAME_TERMINATOR));
        assert_eq!(decode(&frame).expect("decode"), message);
    }

    #[test]
    fn encodes_exact_frames() {
        let cases = [
            (
                Message::auth("alice", "secret1", "Alice").unwrap(),
                "AUTH alice AS Alice USING secret1\r\n",
            ),
            (
                Message::join("discord.general", "Alice").unwrap(),
                "JOIN discord.general AS Alice\r\n",
            ),
            (
                Message::msg("Alice", "hello there").unwrap(),
                "MSG FROM Alice IS hello there\r\n",
            ),
            (
                Message::err("Alice", "oops").unwrap(),
                "ERR FROM Alice IS oops\r\n",
            ),
            (Message::bye("Alice").unwrap(), "BYE FROM Alice\r\n"),
            (
                Message::reply(true, "welcome", None).unwrap(),
                "REPLY OK IS welcome\r\n",
            ),
            (
                Message::reply(false, "denied", None).unwrap(),
                "REPLY NOK IS denied\r\n",
            ),
        ];

        for (message, expected) in cases {
            assert_eq!(encode(&message).unwrap(), expected.as_bytes());
        }
    }

    #[test]
    fn roundtrips_every_stream_kind() {
        roundtrip(Message::auth("alice", "secret1", "Alice").unwrap());
        roundtrip(Message::join("general", "Alice").unwrap());
        roundtrip(Message::msg("Alice", "content with IS inside IS twice").unwrap());
        roundtrip(Message::err("Server", "bad things").unwrap());
        roundtrip(Message::bye("Alice").unwrap());
        roundtrip(Message::reply(true, "ok", None).unwrap());
        roundtrip(Message::reply(false, "nope", None).unwrap());
    }

    #[test]
    fn roundtrips_fields_at_max_length() {
        let name = "n".repeat(DISPLAY_NAME_MAX);
        let content = "c".repeat(CONTENT_MAX);
        roundtrip(Message::msg(name.as_str(), content.as_str()).unwrap());
        roundtrip(Message::auth("u".repeat(20), "s".repeat(128), name).unwrap());
    }

    #[test]
    fn confirm_and_ping_are_not_streamable() {
        assert_eq!(
            encode(&Message::confirm(1)),
            Err(EncodeError::NotStreamable(MessageKind::Confirm))
        );
        assert_eq!(
            encode(&Message::ping()),
            Err(EncodeError::NotStreamable(MessageKind::Ping))
        );
    }

    #[test]
    fn decode_accepts_frames_without_terminator() {
        assert_eq!(
            decode(b"BYE FROM Server").unwrap(),
            Message::bye("Server").unwrap()
        );
    }

    #[test]
    fn keywords_are_case_sensitive() {
        assert!(matches!(
            decode(b"msg from Alice is hi\r\n"),
            Err(DecodeError::UnknownPrefix(_))
        ));
        assert!(matches!(
            decode(b"Reply OK IS hi\r\n"),
            Err(DecodeError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn missing_infix_is_reported() {
        assert_eq!(
            decode(b"MSG FROM Alice hi\r\n"),
            Err(DecodeError::MissingInfix {
                kind: MessageKind::Msg,
                infix: IS
            })
        );
        assert_eq!(
            decode(b"AUTH alice AS Alice secret\r\n"),
            Err(DecodeError::MissingInfix {
                kind: MessageKind::Auth,
                infix: USING
            })
        );
    }

    #[test]
    fn invalid_fields_fail_decoding() {
        assert!(matches!(
            decode(b"MSG FROM Al ice IS hi\r\n"),
            Err(DecodeError::MissingInfix { .. }) | Err(DecodeError::InvalidField(_))
        ));
        assert!(matches!(
            decode(b"REPLY OK IS \r\n"),
            Err(DecodeError::InvalidField(_))
        ));
        assert_eq!(decode("MSG FROM A IS \u{e9}".as_bytes()), Err(DecodeError::NotAscii));
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(matches!(
            decode(b"HELLO world\r\n"),
            Err(DecodeError::UnknownPrefix(prefix)) if prefix == "HELLO world"
        ));
    }
}
