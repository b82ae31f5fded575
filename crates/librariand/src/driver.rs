//! Session driver - runs one Think session over a duplex byte stream.
//!
//! The driver owns the session value, reads one frame at a time, feeds it to
//! the [`ThinkMachine`] and writes back the response. It returns when the
//! machine reaches a terminal phase, the Requester hangs up, or the
//! transport fails. Faults inside a step are reported once as
//! `MODEL_FAILURE` before the driver gives up.

use librarian_shared::{frame, Action, ProtocolError, ThinkRequest, ThinkResponse};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::{fault_response, SessionError, ThinkMachine};

/// How a session ended without a transport or internal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { evidence_count: usize },
    LoopLimited,
    /// Requester closed the stream before a terminal action.
    Disconnected,
}

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("inbound frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Internal fault; a `MODEL_FAILURE` action was already sent.
    #[error("session fault: {0}")]
    Fault(#[source] SessionError),

    #[error("session cancelled")]
    Cancelled,
}

/// Line reader with an upper bound on frame size.
///
/// Frames come back as raw bytes; UTF-8 is checked when the frame is
/// decoded, so a bad frame is a malformed message, not a transport fault.
pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
            line: Vec::new(),
        }
    }

    /// Next raw frame, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        self.line.clear();
        let budget = self.max_frame_bytes as u64 + 1;
        let bytes_read = (&mut self.reader)
            .take(budget)
            .read_until(b'\n', &mut self.line)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if !self.line.ends_with(b"\n") && bytes_read > self.max_frame_bytes {
            return Err(DriveError::FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        Ok(Some(std::mem::take(&mut self.line)))
    }
}

pub async fn write_frame<W>(writer: &mut W, response: &ThinkResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line =
        frame::encode(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Drive one session to its end.
pub async fn drive_session<R, W>(
    machine: &ThinkMachine,
    reader: R,
    mut writer: W,
    max_frame_bytes: usize,
    cancel: CancellationToken,
) -> Result<SessionOutcome, DriveError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameReader::new(reader, max_frame_bytes);
    let mut session = machine.open();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(request_id = %session.request_id(), "Session cancelled while awaiting message");
                return Err(DriveError::Cancelled);
            }
            next = frames.next_frame() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(
                    request_id = %session.request_id(),
                    phase = %session.phase(),
                    "Requester closed stream"
                );
                return Ok(SessionOutcome::Disconnected);
            }
            Err(e) => {
                warn!(request_id = %session.request_id(), error = %e, "Transport error");
                return Err(e);
            }
        };

        let request_id = session.request_id().to_string();
        let message = match frame::decode_bytes::<ThinkRequest>(&line) {
            Ok(message) => message,
            Err(ProtocolError::EmptyFrame) => {
                debug!(request_id = %request_id, "Skipping blank frame");
                continue;
            }
            Err(e) => return Err(report_fault(&mut writer, &request_id, e.into()).await),
        };

        let step = match machine.step(session, message) {
            Ok(step) => step,
            Err(e) => return Err(report_fault(&mut writer, &request_id, e).await),
        };

        write_frame(&mut writer, &step.response).await?;
        info!(
            request_id = %step.response.request_id,
            action = step.response.action.kind(),
            loop_count = step.session.loop_count(),
            "Action sent"
        );

        if step.is_terminal() {
            return Ok(match &step.response.action {
                Action::Complete(complete) => SessionOutcome::Completed {
                    evidence_count: complete.evidence.len(),
                },
                _ => SessionOutcome::LoopLimited,
            });
        }
        session = step.session;
    }
}

/// Best-effort `MODEL_FAILURE` report. If it cannot be delivered the
/// transport error wins.
async fn report_fault<W>(writer: &mut W, request_id: &str, fault: SessionError) -> DriveError
where
    W: AsyncWrite + Unpin,
{
    error!(request_id = %request_id, error = %fault, "Think internal fault");
    match write_frame(writer, &fault_response(request_id, &fault)).await {
        Ok(()) => DriveError::Fault(fault),
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to report fault");
            DriveError::Transport(e)
        }
    }
}
