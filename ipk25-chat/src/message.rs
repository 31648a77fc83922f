//! Message model shared by both transports.
//!
//! A [`Message`] is an optional datagram id plus a [`Body`] holding the
//! kind-specific fields. Constructors validate every field against the
//! protocol's length and alphabet rules, so a `Message` built through them is
//! always safe to put on the wire. The codecs in [`crate::stream_codec`] and
//! [`crate::datagram_codec`] go through the same constructors when decoding.

use std::fmt;

use crate::error::FieldValidationError;

/// Sender-assigned sequence number, only meaningful on the datagram transport.
pub type MessageId = u16;

pub const USERNAME_MAX: usize = 20;
pub const SECRET_MAX: usize = 128;
pub const DISPLAY_NAME_MAX: usize = 20;
pub const CHANNEL_ID_MAX: usize = 20;
pub const CONTENT_MAX: usize = 60_000;

/// Names the field a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Username,
    Secret,
    DisplayName,
    ChannelId,
    Content,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Username => "username",
            Field::Secret => "secret",
            Field::DisplayName => "display name",
            Field::ChannelId => "channel id",
            Field::Content => "content",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Confirm,
    Reply,
    Auth,
    Join,
    Msg,
    Err,
    Bye,
    Ping,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Confirm,
        MessageKind::Reply,
        MessageKind::Auth,
        MessageKind::Join,
        MessageKind::Msg,
        MessageKind::Err,
        MessageKind::Bye,
        MessageKind::Ping,
    ];

    /// Kinds the local side tracks until the peer sends a matching CONFIRM.
    pub fn is_confirmable(self) -> bool {
        matches!(
            self,
            MessageKind::Auth | MessageKind::Join | MessageKind::Msg | MessageKind::Bye
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Confirm => "CONFIRM",
            MessageKind::Reply => "REPLY",
            MessageKind::Auth => "AUTH",
            MessageKind::Join => "JOIN",
            MessageKind::Msg => "MSG",
            MessageKind::Err => "ERR",
            MessageKind::Bye => "BYE",
            MessageKind::Ping => "PING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Auth {
        username: String,
        display_name: String,
        secret: String,
    },
    Join {
        channel_id: String,
        display_name: String,
    },
    Msg {
        display_name: String,
        content: String,
    },
    Err {
        display_name: String,
        content: String,
    },
    Bye {
        display_name: String,
    },
    Reply {
        success: bool,
        content: String,
        /// Id of the request being answered; absent on the stream transport.
        ref_id: Option<MessageId>,
    },
    /// The acknowledged id travels in the datagram header.
    Confirm { ref_id: MessageId },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub body: Body,
}

impl Message {
    fn new(body: Body) -> Self {
        Self { id: None, body }
    }

    pub fn auth(
        username: impl Into<String>,
        secret: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, FieldValidationError> {
        let username = username.into();
        let secret = secret.into();
        let display_name = display_name.into();
        validate_username(&username)?;
        validate_secret(&secret)?;
        validate_display_name(&display_name)?;
        Ok(Self::new(Body::Auth {
            username,
            display_name,
            secret,
        }))
    }

    pub fn join(
        channel_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, FieldValidationError> {
        let channel_id = channel_id.into();
        let display_name = display_name.into();
        validate_channel_id(&channel_id)?;
        validate_display_name(&display_name)?;
        Ok(Self::new(Body::Join {
            channel_id,
            display_name,
        }))
    }

    pub fn msg(
        display_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, FieldValidationError> {
        let display_name = display_name.into();
        let content = content.into();
        validate_display_name(&display_name)?;
        validate_content(&content)?;
        Ok(Self::new(Body::Msg {
            display_name,
            content,
        }))
    }

    pub fn err(
        display_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, FieldValidationError> {
        let display_name = display_name.into();
        let content = content.into();
        validate_display_name(&display_name)?;
        validate_content(&content)?;
        Ok(Self::new(Body::Err {
            display_name,
            content,
        }))
    }

    pub fn bye(display_name: impl Into<String>) -> Result<Self, FieldValidationError> {
        let display_name = display_name.into();
        validate_display_name(&display_name)?;
        Ok(Self::new(Body::Bye { display_name }))
    }

    pub fn reply(
        success: bool,
        content: impl Into<String>,
        ref_id: Option<MessageId>,
    ) -> Result<Self, FieldValidationError> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self::new(Body::Reply {
            success,
            content,
            ref_id,
        }))
    }

    pub fn confirm(ref_id: MessageId) -> Self {
        Self::new(Body::Confirm { ref_id })
    }

    pub fn ping() -> Self {
        Self::new(Body::Ping)
    }

    /// Stamps the datagram id. CONFIRM carries no id of its own, so it is left untouched.
    pub fn with_id(mut self, id: MessageId) -> Self {
        if !matches!(self.body, Body::Confirm { .. }) {
            self.id = Some(id);
        }
        self
    }

    pub fn kind(&self) -> MessageKind {
        match self.body {
            Body::Auth { .. } => MessageKind::Auth,
            Body::Join { .. } => MessageKind::Join,
            Body::Msg { .. } => MessageKind::Msg,
            Body::Err { .. } => MessageKind::Err,
            Body::Bye { .. } => MessageKind::Bye,
            Body::Reply { .. } => MessageKind::Reply,
            Body::Confirm { .. } => MessageKind::Confirm,
            Body::Ping => MessageKind::Ping,
        }
    }
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

fn check(
    field: Field,
    value: &str,
    max: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), FieldValidationError> {
    if value.is_empty() {
        return Err(FieldValidationError::Empty { field });
    }
    if let Some(ch) = value.chars().find(|ch| !allowed(*ch)) {
        return Err(FieldValidationError::InvalidCharacter { field, ch });
    }
    // Every allowed character is ASCII, so byte length equals character count here.
    if value.len() > max {
        return Err(FieldValidationError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

pub fn validate_username(value: &str) -> Result<(), FieldValidationError> {
    check(Field::Username, value, USERNAME_MAX, is_token_char)
}

pub fn validate_secret(value: &str) -> Result<(), FieldValidationError> {
    check(Field::Secret, value, SECRET_MAX, is_token_char)
}

pub fn validate_display_name(value: &str) -> Result<(), FieldValidationError> {
    check(Field::DisplayName, value, DISPLAY_NAME_MAX, |ch| {
        ('\x21'..='\x7e').contains(&ch)
    })
}

pub fn validate_channel_id(value: &str) -> Result<(), FieldValidationError> {
    check(Field::ChannelId, value, CHANNEL_ID_MAX, |ch| {
        is_token_char(ch) || ch == '.'
    })
}

pub fn validate_content(value: &str) -> Result<(), FieldValidationError> {
    check(Field::Content, value, CONTENT_MAX, |ch| {
        ('\x20'..='\x7e').contains(&ch) || ch == '\n'
    })
}
