//! # Client Session
//!
//! Two concurrent halves over one duplex stream:
//!
//! - the **receiver task** reassembles tiles, writes them to the store and
//!   reports each delivery to the frame loop over an mpsc channel;
//! - the **frame loop** paces itself at the frame interval, issues requests
//!   at segment boundaries, feeds the playback buffer and scores QoE.
//!
//! Ledger, buffer and QoE state are owned by the frame loop alone.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use panocast_common::{Priority, SegmentId, SessionConfig, TileId, TileKey, TileStore};
use panocast_transport::{ControlMessage, FramedReader, FramedWriter, FramingError, TileReceiver};

use crate::abr::AbrController;
use crate::buffer::{PlaybackBuffer, PlayoutTick};
use crate::generator::RequestGenerator;
use crate::ledger::SegmentLedger;
use crate::qoe::{QoeAggregator, SessionSummary, Termination};
use crate::trace::ViewportTrace;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sending hello: {0}")]
    Hello(#[source] FramingError),
}

enum Event {
    Delivered {
        key: TileKey,
        bytes: u64,
        at: Instant,
    },
    Closed,
    Fault(String),
    StoreFault(String),
}

/// Plays one session over `stream` and returns its summary.
///
/// Transport and framing faults end the session early; they are reported
/// in [`SessionSummary::termination`] rather than as errors.
pub async fn run<S>(
    stream: S,
    store: Arc<dyn TileStore>,
    trace: &ViewportTrace,
    config: &SessionConfig,
    client_id: &str,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (rd, wr) = tokio::io::split(stream);
    let mut writer = FramedWriter::new(wr, &config.framing);
    writer
        .send_control(&ControlMessage::Hello {
            client_id: client_id.to_owned(),
        })
        .await
        .map_err(SessionError::Hello)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let receiver = TileReceiver::new(FramedReader::new(rd, &config.framing));
    let recv_task = tokio::spawn(receive_tiles(receiver, store.clone(), tx));

    info!(
        client_id,
        abr = ?config.abr.algorithm,
        segments = config.video.segments,
        tiles = config.video.tile_count,
        "session started"
    );

    let mut frames = FrameLoop {
        config,
        store,
        writer,
        events: rx,
        abr: AbrController::new(&config.abr),
        generator: RequestGenerator::new(&config.video, config.qoe.request_scope),
        ledger: SegmentLedger::new(),
        buffer: PlaybackBuffer::new(config.video.frames_per_segment),
        qoe: QoeAggregator::new(config.qoe.missing_policy, config.video.tile_count),
    };
    let termination = frames.play(trace).await;
    let summary = frames.finish(client_id, termination, recv_task).await;

    info!(
        client_id,
        termination = %summary.termination,
        missing_ratio_pct = summary.missing_ratio_pct,
        fov_missing_ratio_pct = summary.fov_missing_ratio_pct,
        stall_count = summary.stall_count,
        total_download_secs = summary.total_download_secs,
        "session finished"
    );
    Ok(summary)
}

async fn receive_tiles<R>(
    mut receiver: TileReceiver<ReadHalf<R>>,
    store: Arc<dyn TileStore>,
    events: mpsc::UnboundedSender<Event>,
) where
    R: AsyncRead,
{
    loop {
        let event = match receiver.next_tile().await {
            Ok(Some(tile)) => {
                let key = tile.key();
                let bytes = tile.data.len() as u64;
                match store.put(key, tile.data) {
                    Ok(_) => Event::Delivered {
                        key,
                        bytes,
                        at: Instant::now(),
                    },
                    Err(e) => Event::StoreFault(e.to_string()),
                }
            }
            Ok(None) => Event::Closed,
            Err(e) if e.is_transport_fault() => {
                warn!(error = %e, "server stream ended, partial tile discarded");
                Event::Closed
            }
            Err(e) => Event::Fault(e.to_string()),
        };
        let last = !matches!(event, Event::Delivered { .. });
        if events.send(event).is_err() || last {
            return;
        }
    }
}

struct FrameLoop<'a, S> {
    config: &'a SessionConfig,
    store: Arc<dyn TileStore>,
    writer: FramedWriter<WriteHalf<S>>,
    events: mpsc::UnboundedReceiver<Event>,
    abr: AbrController,
    generator: RequestGenerator,
    ledger: SegmentLedger,
    buffer: PlaybackBuffer,
    qoe: QoeAggregator,
}

impl<S: AsyncWrite> FrameLoop<'_, S> {
    async fn play(&mut self, trace: &ViewportTrace) -> Termination {
        let interval = self.config.video.frame_interval();
        let total_frames = self.config.video.total_frames();
        let epoch = Instant::now();

        for frame in 0..total_frames {
            let Some(fov) = trace.fov(frame) else {
                warn!(frame, frames = trace.len(), "viewport trace ended early");
                return Termination::TraceExhausted;
            };
            if let Some(end) = self.absorb() {
                return end;
            }

            let segment = self.generator.segment_of(frame);
            if self.generator.is_boundary(frame) {
                if let Err(end) = self.request_segment(segment, fov).await {
                    return end;
                }
            }

            // Wait for the frame's playout time, then score it.
            sleep_until(epoch + interval * (frame as u32 + 1)).await;
            if let Some(end) = self.absorb() {
                return end;
            }
            self.qoe.observe_frame(segment, fov, self.store.as_ref());
            match self.buffer.tick() {
                PlayoutTick::StallStarted => debug!(frame, segment, "playout stalled"),
                PlayoutTick::Played | PlayoutTick::Stalled => {}
            }
        }
        Termination::Completed
    }

    async fn request_segment(
        &mut self,
        segment: SegmentId,
        fov: &[TileId],
    ) -> Result<(), Termination> {
        let ladder = &self.config.abr.ladder;
        let level = self.abr.choose_bitrate(segment, ladder, &self.ledger);
        let bitrate = ladder.bitrate(level);
        let plan = self
            .generator
            .plan(segment, bitrate, fov, self.store.as_ref());
        let high = plan.tiles(Priority::High);
        let low = plan.tiles(Priority::Low);

        if self
            .ledger
            .open(segment, bitrate, &high, &low, Instant::now())
        {
            self.buffer.record_arrival();
        }
        self.qoe.begin_segment(segment, bitrate, plan.eligible());
        info!(
            segment,
            bitrate_kbps = bitrate,
            level,
            high = high.len(),
            low = low.len(),
            held = plan.already_held.len(),
            "segment requested"
        );

        for request in &plan.requests {
            if let Err(e) = self
                .writer
                .send_control(&ControlMessage::Request(*request))
                .await
            {
                warn!(error = %e, segment, "request write failed");
                return Err(Termination::TransportClosed);
            }
        }
        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "request flush failed");
            return Err(Termination::TransportClosed);
        }
        Ok(())
    }

    /// Applies every pending receiver event. Returns a termination reason
    /// once the receiver has stopped.
    fn absorb(&mut self) -> Option<Termination> {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(end) = self.apply(event) {
                        return Some(end);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Some(Termination::TransportClosed)
                }
            }
        }
    }

    fn apply(&mut self, event: Event) -> Option<Termination> {
        match event {
            Event::Delivered { key, bytes, at } => {
                if let Some(segment) = self.ledger.record_delivery(key, bytes, at) {
                    let resumed = self.buffer.record_arrival();
                    debug!(segment, resumed, "segment complete");
                }
                None
            }
            Event::Closed => Some(Termination::TransportClosed),
            Event::Fault(detail) => {
                warn!(%detail, "receiver fault");
                Some(Termination::FramingFault(detail))
            }
            Event::StoreFault(detail) => {
                warn!(%detail, "tile store write failed");
                Some(Termination::StoreFault(detail))
            }
        }
    }

    async fn finish(
        mut self,
        client_id: &str,
        termination: Termination,
        recv_task: JoinHandle<()>,
    ) -> SessionSummary {
        // Scored before draining so late arrivals do not change the result.
        let summary = self.qoe.summary(
            client_id,
            &self.ledger,
            self.buffer.snapshot(),
            termination.clone(),
        );

        if termination != Termination::TransportClosed {
            let ended = match self
                .writer
                .send_control(&ControlMessage::EndOfSession)
                .await
            {
                Ok(()) => self.writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = ended {
                debug!(error = %e, "end of session not delivered");
            }
        }

        let mut recv_task = recv_task;
        match timeout(self.config.drain_timeout, &mut recv_task).await {
            Ok(_) => debug!("receiver drained"),
            Err(_) => {
                warn!(
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "receiver did not drain, aborting"
                );
                recv_task.abort();
            }
        }
        summary
    }
}
