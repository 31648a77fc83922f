//! Session over unreliable datagrams (UDP).
//!
//! # Architecture
//!
//! ```text
//!   input events ──┐                      ┌── retransmit task (id 0)
//!                  ▼                      ├── retransmit task (id 1)
//!        DatagramSession::run ◀── alarms ─┘        ...
//!          │  machine, dedup set,             │
//!          │  dynamic endpoint                │
//!          ▼                                  ▼
//!        Arc<UdpSocket>  ◀────────── PendingTable (Arc<Mutex<..>>)
//! ```
//!
//! The run loop owns the state machine, the set of already-handled inbound
//! ids and the rebound server endpoint. Only the pending-confirmation table
//! is shared, with one retransmit task per unconfirmed message id. Every
//! check-then-act on that table (confirm removal, retransmit, exhaustion)
//! happens under its lock, so a message is never re-sent after its CONFIRM
//! has been processed.

use std::{
    collections::{HashMap, HashSet},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use tokio::{
    net::UdpSocket,
    select,
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    console::{Input, Notice, NoticeSender, notify},
    datagram_codec::{self, tag},
    error::SessionError,
    message::{Body, Message, MessageId, MessageKind},
    session::{InputAction, SessionEnd, deliver, error_message, interpret_input},
    state::{Delivery, StateMachine},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_RETRIES: u8 = 3;

const MAX_DATAGRAM: usize = 65_535;

/// Retransmission parameters, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramConfig {
    /// Wait before each retransmission.
    pub timeout: Duration,
    /// Retransmissions after the original send before giving up.
    pub max_retries: u8,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// An outbound confirmable message still waiting for its CONFIRM.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub id: MessageId,
    pub kind: MessageKind,
    pub target: SocketAddr,
    pub retries: u8,
    pub last_sent: Instant,
    payload: Vec<u8>,
    timer: Option<JoinHandle<()>>,
}

/// Unconfirmed messages keyed by id, shared with the retransmit tasks.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<HashMap<MessageId, PendingConfirmation>>>,
}

impl PendingTable {
    /// Ids still awaiting confirmation, in ascending order.
    pub async fn ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.inner.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Retry count of `id`, if still pending.
    pub async fn retries(&self, id: MessageId) -> Option<u8> {
        self.inner.lock().await.get(&id).map(|entry| entry.retries)
    }

    /// Drops `id` and stops its retransmissions. Returns whether it was pending.
    pub async fn release(&self, id: MessageId) -> bool {
        let removed = self.inner.lock().await.remove(&id);
        match removed {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                debug!(id, kind = %entry.kind, retries = entry.retries, "confirmed");
                true
            }
            None => false,
        }
    }

    async fn cancel_all(&self) {
        let mut table = self.inner.lock().await;
        for (_, entry) in table.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

/// Raised by a retransmit task to the run loop.
#[derive(Debug)]
enum Alarm {
    RetryExhausted { id: MessageId, retries: u8 },
    SendFailed(io::Error),
}

enum Wake {
    Datagram(io::Result<(usize, SocketAddr)>),
    Alarm(Alarm),
    Input(Input),
}

pub struct DatagramSession {
    socket: Arc<UdpSocket>,
    config: DatagramConfig,
    server: SocketAddr,
    dynamic: Option<SocketAddr>,
    next_id: MessageId,
    pending: PendingTable,
    confirmed: HashSet<MessageId>,
    machine: StateMachine,
    notices: NoticeSender,
    alarms_tx: mpsc::UnboundedSender<Alarm>,
    alarms_rx: mpsc::UnboundedReceiver<Alarm>,
    /// Id of our BYE once sent; the session ends when it is confirmed.
    closing: Option<MessageId>,
}

impl DatagramSession {
    pub fn new(
        socket: UdpSocket,
        server: SocketAddr,
        config: DatagramConfig,
        notices: NoticeSender,
    ) -> Self {
        let (alarms_tx, alarms_rx) = mpsc::unbounded_channel();
        Self {
            socket: Arc::new(socket),
            config,
            server,
            dynamic: None,
            next_id: 0,
            pending: PendingTable::default(),
            confirmed: HashSet::new(),
            machine: StateMachine::new(),
            notices,
            alarms_tx,
            alarms_rx,
            closing: None,
        }
    }

    /// Handle on the pending-confirmation table, for inspection.
    pub fn pending(&self) -> PendingTable {
        self.pending.clone()
    }

    /// Where the next message goes: the rebound endpoint once known.
    pub fn target(&self) -> SocketAddr {
        self.dynamic.unwrap_or(self.server)
    }

    /// Runs until either side says goodbye, input ends, or a fatal error.
    ///
    /// A local BYE keeps the session receiving until the BYE is confirmed.
    /// Every retransmit task is cancelled before this returns.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<Input>,
    ) -> Result<SessionEnd, SessionError> {
        info!(server = %self.server, "datagram session started");
        let result = self.drive(&mut input).await;

        if let Err(err) = &result {
            self.machine.terminate();
            if matches!(err, SessionError::Decode(_) | SessionError::Violation(_)) {
                self.send_error(&err.to_string()).await;
            }
        }

        self.pending.cancel_all().await;
        let outcome = result.as_ref().map_err(|err| err.to_string());
        info!(?outcome, "datagram session finished");
        result
    }

    async fn drive(
        &mut self,
        input: &mut mpsc::Receiver<Input>,
    ) -> Result<SessionEnd, SessionError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let wake = select! {
                received = self.socket.recv_from(&mut buf) => Wake::Datagram(received),
                Some(alarm) = self.alarms_rx.recv() => Wake::Alarm(alarm),
                event = input.recv(), if self.closing.is_none() => {
                    Wake::Input(event.unwrap_or(Input::Eof))
                }
            };

            let end = match wake {
                Wake::Datagram(Ok((len, from))) => self.handle_datagram(&buf[..len], from).await?,
                Wake::Datagram(Err(error)) => match error.kind() {
                    // ICMP unreachable surfacing on the next recv; the
                    // retransmit tasks decide when to give up.
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => {
                        warn!(%error, "peer unreachable");
                        None
                    }
                    _ => return Err(error.into()),
                },
                Wake::Alarm(Alarm::RetryExhausted { id, retries }) => {
                    return Err(SessionError::RetryExhausted { id, retries });
                }
                Wake::Alarm(Alarm::SendFailed(error)) => return Err(error.into()),
                Wake::Input(event) => {
                    match interpret_input(event, &mut self.machine, &self.notices) {
                        InputAction::Send(message) => {
                            self.send(message).await?;
                            None
                        }
                        InputAction::End(end) => Some(end),
                        InputAction::Nothing => None,
                    }
                }
            };

            if let Some(end) = end {
                return Ok(end);
            }
        }
    }

    async fn send(&mut self, message: Message) -> Result<(), SessionError> {
        if let Err(err) = self.machine.apply_outbound(&message) {
            notify(&self.notices, Notice::LocalError(err.to_string()));
            return Ok(());
        }

        let id = self.allocate_id();
        let message = message.with_id(id);
        let kind = message.kind();
        let payload = datagram_codec::encode(&message)?;
        self.transmit(id, kind, payload, self.target()).await?;

        if kind == MessageKind::Bye {
            self.closing = Some(id);
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    async fn transmit(
        &self,
        id: MessageId,
        kind: MessageKind,
        payload: Vec<u8>,
        target: SocketAddr,
    ) -> io::Result<()> {
        if !kind.is_confirmable() {
            self.socket.send_to(&payload, target).await?;
            debug!(id, %kind, %target, "sent");
            return Ok(());
        }

        let mut table = self.pending.inner.lock().await;
        self.socket.send_to(&payload, target).await?;
        debug!(id, %kind, %target, "sent, awaiting confirm");

        let timer = spawn_retransmit(
            Arc::clone(&self.socket),
            self.pending.clone(),
            self.alarms_tx.clone(),
            id,
            self.config,
        );
        table.insert(
            id,
            PendingConfirmation {
                id,
                kind,
                target,
                retries: 0,
                last_sent: Instant::now(),
                payload,
                timer: Some(timer),
            },
        );
        Ok(())
    }

    async fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
    ) -> Result<Option<SessionEnd>, SessionError> {
        let header = match datagram_codec::peek_header(datagram) {
            Ok(header) => header,
            Err(error) => {
                warn!(%from, %error, "dropping runt datagram");
                return Ok(None);
            }
        };

        if header.tag == tag::CONFIRM {
            let released = self.pending.release(header.id).await;
            if released && self.closing == Some(header.id) {
                return Ok(Some(SessionEnd::LocalBye));
            }
            return Ok(None);
        }

        if self.confirmed.contains(&header.id) {
            debug!(id = header.id, tag = header.tag, "dropping duplicate");
            return Ok(None);
        }

        let message = match datagram_codec::decode(datagram) {
            Ok(message) => message,
            Err(err) => {
                if header.tag != tag::REPLY {
                    self.send_confirm(header.id, from).await?;
                }
                return Err(err.into());
            }
        };
        debug!(id = header.id, kind = %message.kind(), %from, "received");

        match &message.body {
            // A REPLY acknowledges the request named by its ref id.
            Body::Reply { ref_id, .. } => {
                if let Some(ref_id) = ref_id {
                    self.pending.release(*ref_id).await;
                }
            }
            _ => self.send_confirm(header.id, from).await?,
        }
        self.confirmed.insert(header.id);

        if self.closing.is_some() {
            debug!(id = header.id, "closing, not dispatching");
            return Ok(None);
        }

        let delivery = self.machine.apply_inbound(&message)?;
        if matches!(delivery, Delivery::Reply { success: true, .. }) && self.dynamic.is_none() {
            info!(%from, "server endpoint rebound");
            self.dynamic = Some(from);
        }
        deliver(delivery, &self.notices)
    }

    async fn send_confirm(&self, id: MessageId, to: SocketAddr) -> io::Result<()> {
        let payload = datagram_codec::encode(&Message::confirm(id))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.socket.send_to(&payload, to).await?;
        debug!(id, %to, "confirmed inbound");
        Ok(())
    }

    async fn send_error(&mut self, reason: &str) {
        let Some(message) = error_message(&self.machine, reason) else {
            return;
        };
        let id = self.allocate_id();
        let payload = match datagram_codec::encode(&message.with_id(id)) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode ERR");
                return;
            }
        };
        if let Err(error) = self.transmit(id, MessageKind::Err, payload, self.target()).await {
            warn!(%error, "failed to send ERR before closing");
        }
    }
}

fn spawn_retransmit(
    socket: Arc<UdpSocket>,
    pending: PendingTable,
    alarms: mpsc::UnboundedSender<Alarm>,
    id: MessageId,
    config: DatagramConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(config.timeout).await;

            let mut table = pending.inner.lock().await;
            let Some(entry) = table.get_mut(&id) else {
                return;
            };

            if entry.retries >= config.max_retries {
                let retries = entry.retries;
                let kind = entry.kind;
                table.remove(&id);
                drop(table);
                warn!(id, %kind, retries, "no confirm, giving up");
                let _ = alarms.send(Alarm::RetryExhausted { id, retries });
                return;
            }

            entry.retries += 1;
            entry.last_sent = Instant::now();
            debug!(id, kind = %entry.kind, attempt = entry.retries, "retransmitting");
            if let Err(error) = socket.send_to(&entry.payload, entry.target).await {
                table.remove(&id);
                drop(table);
                let _ = alarms.send(Alarm::SendFailed(error));
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_with(id: MessageId) -> PendingTable {
        let table = PendingTable::default();
        let timer = tokio::spawn(async {
            sleep(Duration::from_secs(60)).await;
        });
        table.inner.lock().await.insert(
            id,
            PendingConfirmation {
                id,
                kind: MessageKind::Msg,
                target: "127.0.0.1:4567".parse().unwrap(),
                retries: 0,
                last_sent: Instant::now(),
                payload: vec![tag::MSG, 0, id as u8],
                timer: Some(timer),
            },
        );
        table
    }

    #[tokio::test]
    async fn release_removes_once() {
        let table = table_with(7).await;
        assert_eq!(table.ids().await, vec![7]);
        assert!(table.release(7).await);
        assert!(!table.release(7).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_all_empties_the_table() {
        let table = table_with(1).await;
        table.cancel_all().await;
        assert_eq!(table.len().await, 0);
    }

    #[test]
    fn default_config() {
        let config = DatagramConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 3);
    }
}
