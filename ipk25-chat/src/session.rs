//! Pieces shared by the stream and datagram sessions.

use crate::{
    command::{self, CommandOutcome, LocalAction},
    console::{Input, Notice, NoticeSender, notify},
    error::SessionError,
    message::{CONTENT_MAX, Message},
    state::{Delivery, StateMachine},
};

/// Display name used in ERR messages sent before the user picked one.
const FALLBACK_DISPLAY_NAME: &str = "client";

/// How a session finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// We sent BYE (and, on datagrams, it was confirmed).
    LocalBye,
    /// The server sent BYE.
    RemoteBye,
    /// Input ended before anyone authenticated; nothing was sent.
    Left,
}

/// What a session should do with one local input event.
pub(crate) enum InputAction {
    Send(Message),
    End(SessionEnd),
    Nothing,
}

/// Interprets a local event, reporting local-only outcomes straight to the user.
pub(crate) fn interpret_input(
    event: Input,
    machine: &mut StateMachine,
    notices: &NoticeSender,
) -> InputAction {
    let outcome = match event {
        Input::Line(line) => command::interpret(&line, machine),
        Input::Eof | Input::Interrupt => command::leave(machine),
    };

    match outcome {
        CommandOutcome::Constructed(message) => InputAction::Send(message),
        CommandOutcome::LocalNoOp(LocalAction::Leave) => InputAction::End(SessionEnd::Left),
        CommandOutcome::LocalNoOp(LocalAction::Help) => {
            notify(notices, Notice::Help);
            InputAction::Nothing
        }
        CommandOutcome::LocalNoOp(LocalAction::Ignored | LocalAction::Renamed) => {
            InputAction::Nothing
        }
        CommandOutcome::LocalError(err) => {
            notify(notices, Notice::LocalError(err.to_string()));
            InputAction::Nothing
        }
    }
}

/// Shows a delivery to the user and decides whether the session is over.
pub(crate) fn deliver(
    delivery: Delivery,
    notices: &NoticeSender,
) -> Result<Option<SessionEnd>, SessionError> {
    if let Some(notice) = Notice::for_delivery(&delivery) {
        notify(notices, notice);
    }
    match delivery {
        Delivery::Goodbye { .. } => Ok(Some(SessionEnd::RemoteBye)),
        Delivery::ServerError {
            display_name,
            content,
        } => Err(SessionError::ServerError {
            display_name,
            content,
        }),
        Delivery::Reply { .. } | Delivery::Chat { .. } | Delivery::KeepAlive => Ok(None),
    }
}

/// Builds the ERR sent to the peer before a fatal local shutdown.
pub(crate) fn error_message(machine: &StateMachine, reason: &str) -> Option<Message> {
    let display_name = machine.display_name().unwrap_or(FALLBACK_DISPLAY_NAME);
    let content: String = reason
        .chars()
        .map(|ch| if (' '..='~').contains(&ch) { ch } else { '?' })
        .take(CONTENT_MAX)
        .collect();
    Message::err(display_name, content).ok()
}
