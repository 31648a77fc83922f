//! Local command interpretation.
//!
//! Turns a line typed by the user into either a [`Message`] ready for the
//! session to send, a purely local action, or a usage error. Lines starting
//! with `/` are commands; anything else is chat content.
//!
//! Legality for the current state is not checked here. Sessions run every
//! constructed message through [`StateMachine::apply_outbound`] before sending.

use crate::{
    error::UsageError,
    message::Message,
    state::StateMachine,
};

pub const HELP_TEXT: &str = "\
Available commands:
  /auth <username> <secret> <display name>  authenticate with the server
  /join <channel>                           join a channel
  /rename <display name>                    change your display name locally
  /quit                                     leave the chat
  /help                                     show this help
Any other text is sent as a chat message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auth {
        username: String,
        secret: String,
        display_name: String,
    },
    Join {
        channel_id: String,
    },
    Rename {
        display_name: String,
    },
    Help,
    Quit,
    Chat {
        content: String,
    },
}

impl Command {
    /// Parses one line of input. Returns `Ok(None)` for blank lines.
    ///
    /// Chat text is kept as typed, minus the line terminator.
    pub fn parse(line: &str) -> Result<Option<Self>, UsageError> {
        let content = line.trim_end_matches(['\r', '\n']);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if !trimmed.starts_with('/') {
            return Ok(Some(Command::Chat {
                content: content.to_string(),
            }));
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let command = match (parts[0], parts.len()) {
            ("/auth", 4) => Command::Auth {
                username: parts[1].to_string(),
                secret: parts[2].to_string(),
                display_name: parts[3].to_string(),
            },
            ("/auth", _) => {
                return Err(UsageError::WrongArguments(
                    "/auth <username> <secret> <display name>",
                ))
            }
            ("/join", 2) => Command::Join {
                channel_id: parts[1].to_string(),
            },
            ("/join", _) => return Err(UsageError::WrongArguments("/join <channel>")),
            ("/rename", 2) => Command::Rename {
                display_name: parts[1].to_string(),
            },
            ("/rename", _) => return Err(UsageError::WrongArguments("/rename <display name>")),
            ("/help", 1) => Command::Help,
            ("/help", _) => return Err(UsageError::WrongArguments("/help")),
            ("/quit", 1) => Command::Quit,
            ("/quit", _) => return Err(UsageError::WrongArguments("/quit")),
            (other, _) => return Err(UsageError::UnknownCommand(other.to_string())),
        };

        Ok(Some(command))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAction {
    /// Blank input.
    Ignored,
    Renamed,
    Help,
    /// Leave without sending anything; nobody has authenticated yet.
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Constructed(Message),
    LocalNoOp(LocalAction),
    LocalError(UsageError),
}

impl From<Result<Message, UsageError>> for CommandOutcome {
    fn from(result: Result<Message, UsageError>) -> Self {
        match result {
            Ok(message) => CommandOutcome::Constructed(message),
            Err(err) => CommandOutcome::LocalError(err),
        }
    }
}

pub fn interpret(line: &str, machine: &mut StateMachine) -> CommandOutcome {
    let command = match Command::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return CommandOutcome::LocalNoOp(LocalAction::Ignored),
        Err(err) => return CommandOutcome::LocalError(err),
    };

    match command {
        Command::Auth {
            username,
            secret,
            display_name,
        } => Message::auth(username, secret, display_name)
            .map_err(UsageError::from)
            .into(),
        Command::Join { channel_id } => current_name(machine)
            .and_then(|name| Message::join(channel_id, name).map_err(UsageError::from))
            .into(),
        Command::Chat { content } => current_name(machine)
            .and_then(|name| Message::msg(name, content).map_err(UsageError::from))
            .into(),
        Command::Rename { display_name } => match machine.rename(&display_name) {
            Ok(()) => CommandOutcome::LocalNoOp(LocalAction::Renamed),
            Err(err) => CommandOutcome::LocalError(err.into()),
        },
        Command::Help => CommandOutcome::LocalNoOp(LocalAction::Help),
        Command::Quit => leave(machine),
    }
}

/// Builds the goodbye for `/quit`, end of input, or an interrupt.
pub fn leave(machine: &StateMachine) -> CommandOutcome {
    match machine.display_name() {
        Some(name) => Message::bye(name).map_err(UsageError::from).into(),
        None => CommandOutcome::LocalNoOp(LocalAction::Leave),
    }
}

fn current_name(machine: &StateMachine) -> Result<String, UsageError> {
    machine
        .display_name()
        .map(str::to_string)
        .ok_or(UsageError::NoDisplayName)
}
