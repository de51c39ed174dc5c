//! The media session controller.
//!
//! A [`MediaSession`] owns a producer and a receiver pipeline and the
//! single worker thread that builds and tears them down. The application
//! talks to it from its own thread:
//!
//! ```text
//!  application                         worker                      graph threads
//!  ───────────                         ──────                      ─────────────
//!  configure_*  ──(state guard)──┐
//!  start/stop   ──(state guard)──┼──▶ Command ──▶ build/teardown ──▶ capture, demux,
//!                                │                                   streaming threads
//!  next_event   ◀────────────────┴──── SessionEvent ◀──────────────── relay notifiers
//!  pull_frame / pull_packet ◀──────── RelayQueue ◀─────────────────── RenderSink / PacketSink
//!  receive_packet ──────────────────▶ RelayQueue ──────────────────▶ TransportSource
//! ```
//!
//! ## Lifecycle (per direction)
//!
//! ```text
//! start()  Idle ─▶ Starting ──worker──▶ Running   (Started event)
//!                            └─worker──▶ Idle      (Error event)
//! stop()   Running ─▶ Stopping ─worker─▶ Idle      (Stopped event)
//! ```
//!
//! A start on a non-idle direction, or a stop on a non-running one, is a
//! no-op reported as [`RequestOutcome::Ignored`].

pub mod config;
pub mod event;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SessionError};
use crate::graph::provider::ElementProvider;
use crate::media::{MediaKind, PayloadDescriptor, PerKind, RenderFrame, TransportPacket};
use crate::pipeline::Relays;
use crate::relay::{PushOutcome, RelayStats};
use crate::state::{PipelineState, PipelineStateMachine, RequestOutcome};

pub use config::{ProducerConfig, ReceiverConfig, SessionConfig};
pub use event::SessionEvent;
use worker::Command;

/// Which half of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture/file → encode → transmit.
    Producer,
    /// Receive → decode → render.
    Receiver,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Producer, Direction::Receiver];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Producer => "producer",
            Direction::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outward transport for producer packets (a socket, a loopback, a test double).
pub trait TransportSink: Send + Sync {
    fn push(&self, packet: TransportPacket) -> Result<()>;
}

/// Where the application shows frames. Best-effort: failures are ignored.
pub trait RenderSurface {
    fn present(&mut self, frame: &RenderFrame) -> Result<()>;
}

/// Names one of the session's relay queues for [`MediaSession::relay_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayId {
    /// Decoded frames: producer preview or receiver output.
    Frames(Direction),
    /// RTP packets: producer outbound or receiver inbound.
    Packets(Direction, MediaKind),
}

/// Availability notices not yet taken by the application, one per queue.
#[derive(Default)]
struct PendingNotices {
    producer_frames: Arc<AtomicBool>,
    receiver_frames: Arc<AtomicBool>,
    packets: PerKind<Arc<AtomicBool>>,
}

impl PendingNotices {
    fn frames(&self, direction: Direction) -> &Arc<AtomicBool> {
        match direction {
            Direction::Producer => &self.producer_frames,
            Direction::Receiver => &self.receiver_frames,
        }
    }

    /// Let the queue behind a delivered notice raise the next one.
    fn delivered(&self, event: &SessionEvent) {
        let flag = match event {
            SessionEvent::FrameAvailable { direction } => self.frames(*direction),
            SessionEvent::PacketAvailable { kind } => self.packets.get(*kind),
            _ => return,
        };
        flag.store(false, Ordering::Release);
    }
}

/// Send `event` unless a notice from the same queue is still pending.
fn notify_once(pending: &AtomicBool, events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if !pending.swap(true, Ordering::AcqRel) && events.send(event).is_err() {
        tracing::trace!("notice dropped, session is gone");
    }
}

/// State shared between the application side and the worker.
pub(crate) struct Shared {
    provider: Arc<dyn ElementProvider>,
    config: SessionConfig,
    producer_state: Mutex<PipelineStateMachine>,
    receiver_state: Mutex<PipelineStateMachine>,
    producer_config: Mutex<ProducerConfig>,
    receiver_config: Mutex<ReceiverConfig>,
    local_payloads: RwLock<PerKind<PayloadDescriptor>>,
    producer: Relays,
    receiver: Relays,
    events: mpsc::Sender<SessionEvent>,
    /// Set once the session is being dropped; aborts blocking construction.
    closing: AtomicBool,
}

impl Shared {
    fn state(&self, direction: Direction) -> &Mutex<PipelineStateMachine> {
        match direction {
            Direction::Producer => &self.producer_state,
            Direction::Receiver => &self.receiver_state,
        }
    }

    fn relays(&self, direction: Direction) -> &Relays {
        match direction {
            Direction::Producer => &self.producer,
            Direction::Receiver => &self.receiver,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event dropped, session is gone");
        }
    }

    /// Queue an inbound packet while the receiver is starting or running.
    fn push_inbound(&self, kind: MediaKind, data: Bytes) -> Result<PushOutcome> {
        // Held across the push so a concurrent stop cannot leave stale packets.
        let state = self.receiver_state.lock();
        match state.state() {
            PipelineState::Starting | PipelineState::Running => {}
            _ => return Err(SessionError::NotRunning(Direction::Receiver)),
        }
        let outcome = self
            .receiver
            .packets(kind)
            .push(TransportPacket::new(kind, data));
        if !outcome.is_queued() {
            tracing::trace!(kind = %kind, ?outcome, "inbound packet not queued");
        }
        Ok(outcome)
    }
}

/// Cloneable handle through which a transport delivers inbound packets.
#[derive(Clone)]
pub struct InboundPackets {
    shared: Arc<Shared>,
}

impl InboundPackets {
    /// Hand one received RTP packet to the receiver.
    ///
    /// Fails with [`SessionError::NotRunning`] unless the receiver is
    /// starting or running.
    pub fn packet_arrived(&self, kind: MediaKind, data: impl Into<Bytes>) -> Result<PushOutcome> {
        self.shared.push_inbound(kind, data.into())
    }
}

impl fmt::Debug for InboundPackets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPackets").finish_non_exhaustive()
    }
}

/// Façade owning both pipelines and the worker context.
///
/// Every method returns without waiting for graph work; the outcome of
/// [`start`](Self::start) and [`stop`](Self::stop) arrives later as a
/// [`SessionEvent`].
pub struct MediaSession {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    events: Mutex<mpsc::Receiver<SessionEvent>>,
    notices: PendingNotices,
    transport: RwLock<Option<Arc<dyn TransportSink>>>,
    worker: Option<JoinHandle<()>>,
}

impl MediaSession {
    /// Create a session and spawn its worker thread.
    pub fn new(provider: Arc<dyn ElementProvider>, config: SessionConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        let shared = Arc::new(Shared {
            producer_state: Mutex::new(PipelineStateMachine::new(Direction::Producer)),
            receiver_state: Mutex::new(PipelineStateMachine::new(Direction::Receiver)),
            producer_config: Mutex::new(ProducerConfig::default()),
            receiver_config: Mutex::new(ReceiverConfig::default()),
            local_payloads: RwLock::new(PerKind::from_fn(PayloadDescriptor::unset)),
            producer: Relays::new(Direction::Producer, &config),
            receiver: Relays::new(Direction::Receiver, &config),
            events: event_tx,
            closing: AtomicBool::new(false),
            provider,
            config,
        });

        let notices = PendingNotices::default();
        for direction in Direction::ALL {
            let events = shared.events.clone();
            let pending = notices.frames(direction).clone();
            shared
                .relays(direction)
                .frames
                .set_notifier(move || {
                    notify_once(&pending, &events, SessionEvent::FrameAvailable { direction });
                });
        }
        for kind in MediaKind::ALL {
            let events = shared.events.clone();
            let pending = notices.packets.get(kind).clone();
            shared.producer.packets(kind).set_notifier(move || {
                notify_once(&pending, &events, SessionEvent::PacketAvailable { kind });
            });
        }

        let worker = worker::spawn(shared.clone(), command_rx)?;
        tracing::debug!("media session created");

        Ok(Self {
            shared,
            commands: command_tx,
            events: Mutex::new(event_rx),
            notices,
            transport: RwLock::new(None),
            worker: Some(worker),
        })
    }

    /// Set the producer inputs. Only legal while the producer is idle.
    pub fn configure_producer(&self, config: ProducerConfig) -> Result<()> {
        let state = self.shared.producer_state.lock();
        ensure_idle(&state)?;
        tracing::debug!(?config, "producer configured");
        *self.shared.producer_config.lock() = config;
        Ok(())
    }

    /// Set the receiver inputs. Only legal while the receiver is idle.
    pub fn configure_receiver(&self, config: ReceiverConfig) -> Result<()> {
        let state = self.shared.receiver_state.lock();
        ensure_idle(&state)?;
        tracing::debug!(?config, "receiver configured");
        *self.shared.receiver_config.lock() = config;
        Ok(())
    }

    /// Request graph construction.
    ///
    /// Configuration problems are reported here, synchronously. Graph
    /// problems arrive later as [`SessionEvent::Error`].
    pub fn start(&self, direction: Direction) -> Result<RequestOutcome> {
        let mut state = self.shared.state(direction).lock();
        if state.state() != PipelineState::Idle {
            return Ok(state.request_start());
        }

        let command = match direction {
            Direction::Producer => {
                let config = self.shared.producer_config.lock().clone();
                config.validate()?;
                Command::StartProducer(config)
            }
            Direction::Receiver => {
                let config = self.shared.receiver_config.lock().clone();
                config.validate()?;
                Command::StartReceiver(config)
            }
        };

        let outcome = state.request_start();
        if self.commands.send(command).is_err() {
            let _ = state.abort_start();
            return Err(SessionError::WorkerGone);
        }
        tracing::info!(direction = %direction, "start requested");
        Ok(outcome)
    }

    /// Request teardown. Completion is signalled by [`SessionEvent::Stopped`].
    pub fn stop(&self, direction: Direction) -> Result<RequestOutcome> {
        let mut state = self.shared.state(direction).lock();
        let outcome = state.request_stop();
        if outcome.is_accepted() {
            if self.commands.send(Command::Stop(direction)).is_err() {
                let _ = state.complete_stop();
                return Err(SessionError::WorkerGone);
            }
            tracing::info!(direction = %direction, "stop requested");
        }
        Ok(outcome)
    }

    pub fn state(&self, direction: Direction) -> PipelineState {
        self.shared.state(direction).lock().state()
    }

    /// The producer's negotiated descriptor for `kind`.
    ///
    /// Unset (payload type `-1`) until the producer's `Started` event, and
    /// again after it stops.
    pub fn local_payload_info(&self, kind: MediaKind) -> PayloadDescriptor {
        self.shared.local_payloads.read().get(kind).clone()
    }

    pub fn set_transport_sink(&self, sink: Arc<dyn TransportSink>) {
        *self.transport.write() = Some(sink);
    }

    pub fn clear_transport_sink(&self) {
        *self.transport.write() = None;
    }

    /// Hand one packet to the registered transport sink.
    pub fn send_packet(&self, kind: MediaKind, data: impl Into<Bytes>) -> Result<()> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(SessionError::NoTransport)?;
        transport.push(TransportPacket::new(kind, data))
    }

    /// Drain every queued outbound packet into the transport sink.
    ///
    /// Returns the number of packets sent.
    pub fn send_pending(&self) -> Result<usize> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(SessionError::NoTransport)?;
        let mut sent = 0;
        for kind in MediaKind::ALL {
            while let Some(packet) = self.shared.producer.packets(kind).pop() {
                transport.push(packet)?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Hand one received RTP packet to the receiver.
    pub fn receive_packet(&self, kind: MediaKind, data: impl Into<Bytes>) -> Result<PushOutcome> {
        self.shared.push_inbound(kind, data.into())
    }

    /// A handle a transport thread can keep to deliver inbound packets.
    pub fn inbound(&self) -> InboundPackets {
        InboundPackets {
            shared: self.shared.clone(),
        }
    }

    /// Take the oldest decoded frame, if any. Audio has no frames.
    pub fn pull_frame(&self, direction: Direction, kind: MediaKind) -> Option<RenderFrame> {
        match kind {
            MediaKind::Video => self.shared.relays(direction).frames.pop(),
            MediaKind::Audio => None,
        }
    }

    /// Take the oldest outbound packet, if any. Only the producer emits packets.
    pub fn pull_packet(&self, direction: Direction, kind: MediaKind) -> Option<TransportPacket> {
        match direction {
            Direction::Producer => self.shared.producer.packets(kind).pop(),
            Direction::Receiver => None,
        }
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Frame and packet notices are coalesced: a queue raises no new one
    /// until its previous notice has been returned from here.
    pub fn next_event(&self, timeout: Duration) -> Option<SessionEvent> {
        let event = match self.events.lock().recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        };
        self.notices.delivered(&event);
        Some(event)
    }

    pub fn try_next_event(&self) -> Option<SessionEvent> {
        let event = self.events.lock().try_recv().ok()?;
        self.notices.delivered(&event);
        Some(event)
    }

    /// Drain a direction's frame queue into `surface`.
    ///
    /// Returns how many frames were presented successfully.
    pub fn present_frames(&self, direction: Direction, surface: &mut dyn RenderSurface) -> usize {
        let mut presented = 0;
        while let Some(frame) = self.shared.relays(direction).frames.pop() {
            match surface.present(&frame) {
                Ok(()) => presented += 1,
                Err(e) => tracing::debug!(direction = %direction, error = %e, "present failed"),
            }
        }
        presented
    }

    pub fn relay_stats(&self, relay: RelayId) -> RelayStats {
        match relay {
            RelayId::Frames(direction) => self.shared.relays(direction).frames.stats(),
            RelayId::Packets(direction, kind) => {
                self.shared.relays(direction).packets(kind).stats()
            }
        }
    }

    /// Frames refused by a direction's render sink (bad size or no dimensions).
    pub fn rejected_frames(&self, direction: Direction) -> u64 {
        self.shared.relays(direction).rejected_frames()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        for direction in Direction::ALL {
            self.shared.relays(direction).frames.clear_notifier();
        }
        for kind in MediaKind::ALL {
            self.shared.producer.packets(kind).clear_notifier();
        }
        tracing::debug!("media session closed");
    }
}

fn ensure_idle(state: &PipelineStateMachine) -> Result<()> {
    match state.state() {
        PipelineState::Idle => Ok(()),
        other => Err(SessionError::NotIdle {
            direction: state.direction(),
            state: other,
        }),
    }
}
