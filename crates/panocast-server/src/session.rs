//! # Server Session
//!
//! One session per client stream. The stream is split in two:
//!
//! - a reader task decodes control envelopes and forwards them as
//!   [`Command`]s over an mpsc channel;
//! - the session owner holds the [`Scheduler`] and the write half, absorbs
//!   commands, and serves tiles in discipline order.
//!
//! Only the owner touches the queue. Writing a tile never blocks reading
//! the next request because the reader runs independently.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use panocast_common::{BitrateLadder, SessionConfig, StoreError, TileRequest, TileStore};
use panocast_transport::wire::MessageTag;
use panocast_transport::{ControlMessage, FramedReader, FramedWriter, FramingError};

use crate::scheduler::{Scheduler, SchedulerStats};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client did not open with a hello")]
    MissingHello,
    #[error("unexpected {0:?} message from client")]
    UnexpectedMessage(MessageTag),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct ServerReport {
    pub client_id: String,
    pub discipline: &'static str,
    pub stats: SchedulerStats,
    /// Requests for tiles the store does not hold.
    pub missing: u64,
    /// Requests for tile ids outside the configured tile range or for a
    /// bitrate that is not on the ladder.
    pub rejected: u64,
    pub bytes_sent: u64,
    /// `true` when the client sent end-of-session, `false` when the stream
    /// just closed.
    pub ended_by_client: bool,
}

enum Command {
    Enqueue {
        request: TileRequest,
        arrival_us: u64,
    },
    EndOfSession,
    Closed,
    Fault(SessionError),
}

/// Runs one session to completion over `stream`.
pub async fn serve<S>(
    stream: S,
    store: Arc<dyn TileStore>,
    config: &SessionConfig,
) -> Result<ServerReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (rd, wr) = tokio::io::split(stream);
    let mut reader = FramedReader::new(rd, &config.framing);

    let client_id = match reader.read_control().await? {
        Some(ControlMessage::Hello { client_id }) => client_id,
        _ => return Err(SessionError::MissingHello),
    };

    let scheduler = Scheduler::new(&config.scheduler);
    info!(
        client_id = %client_id,
        discipline = scheduler.name(),
        "session started"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let read_task = tokio::spawn(read_requests(reader, tx, Instant::now()));

    let mut session = ServerSession {
        client_id,
        scheduler,
        writer: FramedWriter::new(wr, &config.framing),
        store,
        tile_count: config.video.tile_count,
        ladder: config.abr.ladder.clone(),
        missing: 0,
        rejected: 0,
        bytes_sent: 0,
    };
    let result = session.run(rx).await;
    read_task.abort();

    let discarded = session.scheduler.discard_all();
    if discarded > 0 {
        info!(client_id = %session.client_id, discarded, "queued requests discarded");
    }
    if let Err(e) = session.writer.shutdown().await {
        debug!(error = %e, "write half already closed");
    }

    let ended_by_client = result?;
    let report = session.report(ended_by_client);
    info!(
        client_id = %report.client_id,
        served = report.stats.served(),
        served_high = report.stats.served_high,
        served_low = report.stats.served_low,
        missing = report.missing,
        bytes_sent = report.bytes_sent,
        "session ended"
    );
    Ok(report)
}

async fn read_requests<R>(
    mut reader: FramedReader<ReadHalf<R>>,
    tx: mpsc::UnboundedSender<Command>,
    epoch: Instant,
) where
    R: AsyncRead,
{
    loop {
        let cmd = match reader.read_control().await {
            Ok(Some(ControlMessage::Request(request))) => Command::Enqueue {
                request,
                arrival_us: epoch.elapsed().as_micros() as u64,
            },
            Ok(Some(ControlMessage::EndOfSession)) => Command::EndOfSession,
            Ok(Some(other)) => Command::Fault(SessionError::UnexpectedMessage(other.tag())),
            Ok(None) => Command::Closed,
            Err(e) if e.is_transport_fault() => {
                warn!(error = %e, "client stream ended");
                Command::Closed
            }
            Err(e) => Command::Fault(e.into()),
        };
        let last = !matches!(cmd, Command::Enqueue { .. });
        if tx.send(cmd).is_err() || last {
            return;
        }
    }
}

struct ServerSession<W> {
    client_id: String,
    scheduler: Scheduler,
    writer: FramedWriter<WriteHalf<W>>,
    store: Arc<dyn TileStore>,
    tile_count: u16,
    ladder: BitrateLadder,
    missing: u64,
    rejected: u64,
    bytes_sent: u64,
}

enum Flow {
    Continue,
    End { by_client: bool },
}

impl<W: AsyncWrite> ServerSession<W> {
    async fn run(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
    ) -> Result<bool, SessionError> {
        loop {
            // Absorb everything that has already arrived so the discipline
            // sees the full backlog before choosing.
            loop {
                match rx.try_recv() {
                    Ok(cmd) => {
                        if let Flow::End { by_client } = self.handle(cmd)? {
                            return Ok(by_client);
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return Ok(false),
                }
            }

            if let Some(entry) = self.scheduler.next_to_serve() {
                self.send(entry.request).await?;
                continue;
            }

            match rx.recv().await {
                Some(cmd) => {
                    if let Flow::End { by_client } = self.handle(cmd)? {
                        return Ok(by_client);
                    }
                }
                None => return Ok(false),
            }
        }
    }

    fn handle(&mut self, cmd: Command) -> Result<Flow, SessionError> {
        match cmd {
            Command::Enqueue {
                request,
                arrival_us,
            } => {
                self.enqueue(request, arrival_us);
                Ok(Flow::Continue)
            }
            Command::EndOfSession => {
                info!(client_id = %self.client_id, "end of session requested");
                Ok(Flow::End { by_client: true })
            }
            Command::Closed => Ok(Flow::End { by_client: false }),
            Command::Fault(e) => Err(e),
        }
    }

    fn enqueue(&mut self, request: TileRequest, arrival_us: u64) {
        if request.tile > self.tile_count {
            warn!(
                client_id = %self.client_id,
                tile = request.tile,
                tile_count = self.tile_count,
                "request for tile outside range dropped"
            );
            self.rejected += 1;
            return;
        }
        if !self.ladder.contains(request.bitrate_kbps) {
            warn!(
                client_id = %self.client_id,
                bitrate_kbps = request.bitrate_kbps,
                ladder = ?self.ladder.levels(),
                "request for bitrate off the ladder dropped"
            );
            self.rejected += 1;
            return;
        }
        let key = request.key();
        match self.store.size(&key) {
            Some(cost) => {
                self.scheduler.enqueue(request, arrival_us, cost);
                debug!(
                    %key,
                    priority = %request.priority,
                    queued = self.scheduler.len(),
                    "request queued"
                );
            }
            None => {
                warn!(client_id = %self.client_id, %key, "requested tile not in store, skipping");
                self.missing += 1;
            }
        }
    }

    async fn send(&mut self, request: TileRequest) -> Result<(), SessionError> {
        let key = request.key();
        let Some(data) = self.store.get(&key)? else {
            warn!(client_id = %self.client_id, %key, "tile vanished from store, skipping");
            self.missing += 1;
            return Ok(());
        };
        self.writer.send_tile(key, &data).await?;
        self.writer.flush().await?;
        self.bytes_sent += data.len() as u64;
        debug!(
            %key,
            priority = %request.priority,
            bytes = data.len(),
            phase = ?self.scheduler.phase(),
            "tile served"
        );
        Ok(())
    }

    fn report(&self, ended_by_client: bool) -> ServerReport {
        ServerReport {
            client_id: self.client_id.clone(),
            discipline: self.scheduler.name(),
            stats: self.scheduler.stats(),
            missing: self.missing,
            rejected: self.rejected,
            bytes_sent: self.bytes_sent,
            ended_by_client,
        }
    }
}
