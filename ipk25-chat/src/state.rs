//! Per-session client state machine.
//!
//! ```text
//!   Start --AUTH--> Auth --REPLY ok--> Open --JOIN--> Join
//!                    ^ |                 ^              |
//!                    +-+ REPLY nok       +--- REPLY ----+
//!
//!   any --BYE (either direction) / ERR received / fatal error--> End
//! ```
//!
//! The machine is transport-agnostic: sessions ask it whether an outbound
//! message is legal before transmitting, and feed it every decoded inbound
//! message. It never touches the network itself.

use std::fmt;

use tracing::debug;

use crate::{
    error::{FieldValidationError, ProtocolViolation, UsageError},
    message::{Body, Message, MessageKind, validate_display_name},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Start,
    Auth,
    Join,
    Open,
    End,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Start => "start",
            ClientState::Auth => "auth",
            ClientState::Join => "join",
            ClientState::Open => "open",
            ClientState::End => "end",
        };
        f.write_str(name)
    }
}

/// What an accepted inbound message means for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Reply { success: bool, content: String },
    Chat { display_name: String, content: String },
    /// The peer reported an error; the session is over.
    ServerError { display_name: String, content: String },
    /// The peer said goodbye; the session is over.
    Goodbye { display_name: String },
    KeepAlive,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ClientState,
    display_name: Option<String>,
    channel: Option<String>,
    requested_channel: Option<String>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ClientState::Start,
            display_name: None,
            channel: None,
            requested_channel: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == ClientState::End
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Channel confirmed by the most recent successful JOIN reply.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Local rename. Nothing is sent; later messages carry the new name.
    pub fn rename(&mut self, display_name: &str) -> Result<(), FieldValidationError> {
        validate_display_name(display_name)?;
        self.display_name = Some(display_name.to_string());
        Ok(())
    }

    pub fn check_outbound(&self, kind: MessageKind) -> Result<(), UsageError> {
        let allowed = match kind {
            MessageKind::Auth => matches!(self.state, ClientState::Start | ClientState::Auth),
            MessageKind::Join | MessageKind::Msg => self.state == ClientState::Open,
            MessageKind::Bye | MessageKind::Err => self.state != ClientState::End,
            MessageKind::Confirm => true,
            MessageKind::Reply | MessageKind::Ping => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(UsageError::NotAllowed {
                kind,
                state: self.state,
            })
        }
    }

    /// Validates `message` against the current state and applies the local
    /// side of the transition. Call before transmitting.
    pub fn apply_outbound(&mut self, message: &Message) -> Result<(), UsageError> {
        self.check_outbound(message.kind())?;

        match &message.body {
            Body::Auth { display_name, .. } => {
                self.display_name = Some(display_name.clone());
                self.transition(ClientState::Auth);
            }
            Body::Join { channel_id, .. } => {
                self.requested_channel = Some(channel_id.clone());
                self.transition(ClientState::Join);
            }
            Body::Bye { .. } | Body::Err { .. } => self.transition(ClientState::End),
            Body::Msg { .. } | Body::Confirm { .. } | Body::Reply { .. } | Body::Ping => {}
        }
        Ok(())
    }

    /// Applies a decoded inbound message. Anything illegal for the current
    /// state ends the session and is reported as a [`ProtocolViolation`].
    pub fn apply_inbound(&mut self, message: &Message) -> Result<Delivery, ProtocolViolation> {
        let state = self.state;
        let violation = ProtocolViolation {
            kind: message.kind(),
            state,
        };

        if state == ClientState::End {
            return Err(violation);
        }

        let delivery = match (&message.body, state) {
            (Body::Bye { display_name }, _) => {
                self.transition(ClientState::End);
                Delivery::Goodbye {
                    display_name: display_name.clone(),
                }
            }
            (
                Body::Err {
                    display_name,
                    content,
                },
                _,
            ) => {
                self.transition(ClientState::End);
                Delivery::ServerError {
                    display_name: display_name.clone(),
                    content: content.clone(),
                }
            }
            (Body::Ping, _) => Delivery::KeepAlive,
            (
                Body::Reply {
                    success, content, ..
                },
                ClientState::Auth,
            ) => {
                if *success {
                    self.transition(ClientState::Open);
                }
                Delivery::Reply {
                    success: *success,
                    content: content.clone(),
                }
            }
            (
                Body::Reply {
                    success, content, ..
                },
                ClientState::Join,
            ) => {
                let requested = self.requested_channel.take();
                if *success {
                    self.channel = requested;
                }
                self.transition(ClientState::Open);
                Delivery::Reply {
                    success: *success,
                    content: content.clone(),
                }
            }
            (
                Body::Msg {
                    display_name,
                    content,
                },
                ClientState::Open,
            ) => Delivery::Chat {
                display_name: display_name.clone(),
                content: content.clone(),
            },
            _ => {
                self.transition(ClientState::End);
                return Err(violation);
            }
        };

        Ok(delivery)
    }

    /// Forces `End` after a fatal condition outside the transition table.
    pub fn terminate(&mut self) {
        self.transition(ClientState::End);
    }

    fn transition(&mut self, next: ClientState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }
}
