//! Terminal side of the client: local input events in, user-visible notices out.
//!
//! Sessions never print. They push [`Notice`]s into a channel and read
//! [`Input`] events from another, which keeps them testable without a
//! terminal. [`spawn_input_pump`] and [`print_notices`] connect those
//! channels to the real stdin and stdout.

use std::{fmt, io::BufRead, thread};

use tokio::{
    io::{self, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{command::HELP_TEXT, state::Delivery};

pub type NoticeSender = mpsc::UnboundedSender<Notice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// One event from the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// End of input (Ctrl-D).
    Eof,
    /// Ctrl-C.
    Interrupt,
}

/// A line of user-visible output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Reply { success: bool, content: String },
    Chat { display_name: String, content: String },
    ServerError { display_name: String, content: String },
    LocalError(String),
    Help,
}

impl Notice {
    /// The notice for a delivery, if the user should see one.
    pub fn for_delivery(delivery: &Delivery) -> Option<Self> {
        match delivery {
            Delivery::Reply { success, content } => Some(Notice::Reply {
                success: *success,
                content: content.clone(),
            }),
            Delivery::Chat {
                display_name,
                content,
            } => Some(Notice::Chat {
                display_name: display_name.clone(),
                content: content.clone(),
            }),
            Delivery::ServerError {
                display_name,
                content,
            } => Some(Notice::ServerError {
                display_name: display_name.clone(),
                content: content.clone(),
            }),
            Delivery::Goodbye { .. } | Delivery::KeepAlive => None,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Reply {
                success: true,
                content,
            } => write!(f, "Action Success: {content}"),
            Notice::Reply {
                success: false,
                content,
            } => write!(f, "Action Failure: {content}"),
            Notice::Chat {
                display_name,
                content,
            } => write!(f, "{display_name}: {content}"),
            Notice::ServerError {
                display_name,
                content,
            } => write!(f, "ERROR FROM {display_name}: {content}"),
            Notice::LocalError(details) => write!(f, "ERROR: {details}"),
            Notice::Help => f.write_str(HELP_TEXT),
        }
    }
}

/// Pushes `notice` to the printer. A closed printer only means nobody is watching.
pub fn notify(notices: &NoticeSender, notice: Notice) {
    if notices.send(notice).is_err() {
        debug!("notice receiver dropped");
    }
}

/// Forwards stdin lines and Ctrl-C to `tx`.
///
/// Stdin is read on a plain thread: a blocking read parked in Tokio's
/// blocking pool would hold up runtime shutdown after the session ends.
pub fn spawn_input_pump(tx: mpsc::Sender<Input>) {
    let stdin_tx = tx.clone();
    let spawned = thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if stdin_tx.blocking_send(Input::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(?error, "failed to read stdin");
                        break;
                    }
                }
            }
            let _ = stdin_tx.blocking_send(Input::Eof);
        });
    if let Err(error) = spawned {
        warn!(?error, "failed to spawn stdin reader");
    }

    tokio::spawn(async move {
        loop {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(?error, "ctrl-c handler failed");
                return;
            }
            if tx.send(Input::Interrupt).await.is_err() {
                return;
            }
        }
    });
}

/// Prints notices to stdout until every sender is dropped.
pub async fn print_notices(mut notices: NoticeReceiver) -> io::Result<()> {
    while let Some(notice) = notices.recv().await {
        write_stdout(&notice.to_string()).await?;
    }
    Ok(())
}

pub async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
