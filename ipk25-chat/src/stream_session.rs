//! Session over a reliable byte stream (TCP).
//!
//! The stream already guarantees ordering and delivery, so the session only
//! frames, validates and dispatches. Frames may arrive split across reads or
//! several to a read; [`FrameBuffer`] reassembles them.

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    console::{Input, Notice, NoticeSender, notify},
    error::{DecodeError, SessionError},
    message::{Message, MessageKind},
    session::{InputAction, SessionEnd, deliver, error_message, interpret_input},
    state::StateMachine,
    stream_codec::{self, FRAME_TERMINATOR},
};

/// Longest frame accepted before giving up on finding a terminator.
pub const MAX_FRAME_LEN: usize = 65_536;

const READ_CHUNK: usize = 4096;

/// Accumulates stream bytes and yields complete `\r\n`-terminated frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_LEN)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame without its terminator.
    pub fn next_frame(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        let end = self
            .buf
            .windows(FRAME_TERMINATOR.len())
            .position(|window| window == FRAME_TERMINATOR);

        match end {
            Some(end) => {
                let frame = self.buf.split_to(end);
                self.buf.advance(FRAME_TERMINATOR.len());
                Ok(Some(frame))
            }
            None if self.buf.len() > self.max_frame => {
                Err(DecodeError::FrameTooLong(self.max_frame))
            }
            None => Ok(None),
        }
    }

    fn spare(&mut self) -> &mut BytesMut {
        self.buf.reserve(READ_CHUNK);
        &mut self.buf
    }
}

enum Wake {
    Read(std::io::Result<usize>),
    Input(Input),
}

pub struct StreamSession<R, W> {
    reader: R,
    writer: W,
    frames: FrameBuffer,
    machine: StateMachine,
    notices: NoticeSender,
}

impl<R, W> StreamSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, notices: NoticeSender) -> Self {
        Self {
            reader,
            writer,
            frames: FrameBuffer::new(),
            machine: StateMachine::new(),
            notices,
        }
    }

    /// Runs until either side says goodbye, input ends, or a fatal error.
    ///
    /// Malformed frames and protocol violations are answered with an ERR
    /// before the connection is closed.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<Input>,
    ) -> Result<SessionEnd, SessionError> {
        let result = self.drive(&mut input).await;

        if let Err(err) = &result {
            self.machine.terminate();
            if matches!(err, SessionError::Decode(_) | SessionError::Violation(_)) {
                self.send_error(&err.to_string()).await;
            }
        }

        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shut down stream cleanly");
        }
        let outcome = result.as_ref().map_err(|err| err.to_string());
        info!(?outcome, "stream session finished");
        result
    }

    async fn drive(
        &mut self,
        input: &mut mpsc::Receiver<Input>,
    ) -> Result<SessionEnd, SessionError> {
        loop {
            let wake = select! {
                read = self.reader.read_buf(self.frames.spare()) => Wake::Read(read),
                event = input.recv() => Wake::Input(event.unwrap_or(Input::Eof)),
            };

            match wake {
                Wake::Read(read) => {
                    if read? == 0 {
                        return Err(SessionError::ConnectionClosed);
                    }
                    while let Some(frame) = self.frames.next_frame()? {
                        if let Some(end) = self.handle_frame(&frame)? {
                            return Ok(end);
                        }
                    }
                }
                Wake::Input(event) => {
                    match interpret_input(event, &mut self.machine, &self.notices) {
                        InputAction::Send(message) => {
                            if let Some(end) = self.send(message).await? {
                                return Ok(end);
                            }
                        }
                        InputAction::End(end) => return Ok(end),
                        InputAction::Nothing => {}
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<SessionEnd>, SessionError> {
        let message = stream_codec::decode(frame)?;
        debug!(kind = %message.kind(), "received frame");
        let delivery = self.machine.apply_inbound(&message)?;
        deliver(delivery, &self.notices)
    }

    async fn send(&mut self, message: Message) -> Result<Option<SessionEnd>, SessionError> {
        if let Err(err) = self.machine.apply_outbound(&message) {
            notify(&self.notices, Notice::LocalError(err.to_string()));
            return Ok(None);
        }

        self.write_message(&message).await?;
        debug!(kind = %message.kind(), state = %self.machine.state(), "sent frame");

        if message.kind() == MessageKind::Bye {
            return Ok(Some(SessionEnd::LocalBye));
        }
        Ok(None)
    }

    async fn send_error(&mut self, reason: &str) {
        let Some(message) = error_message(&self.machine, reason) else {
            return;
        };
        if let Err(error) = self.write_message(&message).await {
            warn!(%error, "failed to send ERR before closing");
        }
    }

    async fn write_message(&mut self, message: &Message) -> Result<(), SessionError> {
        let frame = stream_codec::encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_two_frames_from_one_read() {
        let mut frames = FrameBuffer::new();
        frames.extend(b"REPLY OK IS hi\r\nMSG FROM Bob IS yo\r\n");
        assert_eq!(&frames.next_frame().unwrap().unwrap()[..], b"REPLY OK IS hi");
        assert_eq!(&frames.next_frame().unwrap().unwrap()[..], b"MSG FROM Bob IS yo");
        assert!(frames.next_frame().unwrap().is_none());
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn reassembles_a_split_frame() {
        let mut frames = FrameBuffer::new();
        frames.extend(b"BYE FROM Ser");
        assert!(frames.next_frame().unwrap().is_none());
        frames.extend(b"ver\r");
        assert!(frames.next_frame().unwrap().is_none());
        frames.extend(b"\nREPLY");
        assert_eq!(&frames.next_frame().unwrap().unwrap()[..], b"BYE FROM Server");
        assert!(frames.next_frame().unwrap().is_none());
        assert_eq!(frames.pending(), 5);
    }

    #[test]
    fn bare_newline_does_not_end_a_frame() {
        let mut frames = FrameBuffer::new();
        frames.extend(b"MSG FROM Bob IS a\nb\r\n");
        assert_eq!(&frames.next_frame().unwrap().unwrap()[..], b"MSG FROM Bob IS a\nb");
    }

    #[test]
    fn unterminated_frame_is_bounded() {
        let mut frames = FrameBuffer::with_max_frame(8);
        frames.extend(b"123456789");
        assert_eq!(frames.next_frame(), Err(DecodeError::FrameTooLong(8)));
    }
}
