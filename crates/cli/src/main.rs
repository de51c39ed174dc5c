use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avsession::session::InboundPackets;
use avsession::testsrc::{SyntheticProvider, VirtualStream};
use avsession::{
    Direction, MediaKind, MediaSession, PayloadDescriptor, ProducerConfig, ReceiverConfig,
    RelayId, RenderFrame, RenderSurface, SessionConfig, SessionError, SessionEvent,
    TransportPacket, TransportSink,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "avsession-loopback",
    about = "Run a producer into a receiver through an in-process transport"
)]
struct Args {
    /// Video capture selector (empty to disable video)
    #[arg(long, default_value = SyntheticProvider::VIDEO_DEVICE)]
    video: String,

    /// Audio capture selector (empty to disable audio)
    #[arg(long, default_value = SyntheticProvider::AUDIO_DEVICE)]
    audio: String,

    /// Produce from a virtual Ogg file with one Theora and one Speex stream
    /// instead of capture devices
    #[arg(long, conflicts_with_all = ["video", "audio"])]
    file: Option<PathBuf>,

    /// Receiver audio output
    #[arg(long, default_value = SyntheticProvider::AUDIO_OUTPUT)]
    speakers: String,

    /// Test pattern size
    #[arg(long, default_value_t = 64)]
    width: u16,
    #[arg(long, default_value_t = 48)]
    height: u16,

    /// Receiver jitter buffer latency in milliseconds
    #[arg(long, default_value_t = 100)]
    latency_ms: u64,

    /// How long to stream
    #[arg(long, short, default_value_t = 3)]
    seconds: u64,
}

/// Delivers producer packets straight into the receiver.
struct Loopback {
    inbound: InboundPackets,
}

impl TransportSink for Loopback {
    fn push(&self, packet: TransportPacket) -> avsession::Result<()> {
        self.inbound
            .packet_arrived(packet.kind, packet.data)
            .map(|_| ())
    }
}

#[derive(Default)]
struct FrameCounter {
    frames: u64,
    last: Option<(u32, u32)>,
}

impl RenderSurface for FrameCounter {
    fn present(&mut self, frame: &RenderFrame) -> avsession::Result<()> {
        self.frames += 1;
        self.last = Some((frame.width(), frame.height()));
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("loopback failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut provider = SyntheticProvider::new().with_video_size(args.width, args.height);
    let producer = match &args.file {
        Some(path) => {
            provider = provider.with_file(
                path.clone(),
                vec![
                    VirtualStream::new("video-0", "video/x-theora"),
                    VirtualStream::new("audio-0", "audio/x-speex"),
                ],
            );
            ProducerConfig::file(path.clone())
        }
        None => ProducerConfig::devices(Some(args.audio.as_str()), Some(args.video.as_str())),
    };
    let provider = Arc::new(provider);

    let config = SessionConfig {
        jitter_latency: Duration::from_millis(args.latency_ms),
        ..SessionConfig::default()
    };
    let session = MediaSession::new(provider.clone(), config)?;

    session.configure_producer(producer)?;
    session.start(Direction::Producer)?;
    let payloads = wait_started(&session, Direction::Producer)?;
    for payload in &payloads {
        match payload.to_structure() {
            Ok(caps) => println!("producer {}: {caps}", payload.kind),
            Err(e) => println!("producer {}: {e}", payload.kind),
        }
    }

    session.configure_receiver(receiver_config(&payloads, &args.speakers))?;
    session.start(Direction::Receiver)?;
    wait_started(&session, Direction::Receiver)?;
    session.set_transport_sink(Arc::new(Loopback {
        inbound: session.inbound(),
    }));

    let mut preview = FrameCounter::default();
    let mut remote = FrameCounter::default();
    let mut sent = 0;
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        sent += session.send_pending()?;
        session.present_frames(Direction::Producer, &mut preview);
        session.present_frames(Direction::Receiver, &mut remote);
        std::thread::sleep(Duration::from_millis(5));
    }

    for direction in [Direction::Receiver, Direction::Producer] {
        if session.stop(direction)?.is_accepted() {
            wait_for(&session, |event| {
                matches!(event, SessionEvent::Stopped { direction: d } if *d == direction)
            })?;
        }
    }

    println!("packets sent: {sent}");
    println!("preview frames: {} {:?}", preview.frames, preview.last);
    println!("remote frames: {} {:?}", remote.frames, remote.last);
    println!("audio buffers played: {}", provider.audio_buffers_rendered());
    for direction in [Direction::Producer, Direction::Receiver] {
        println!(
            "{direction} frames: {}",
            session.relay_stats(RelayId::Frames(direction))
        );
        for kind in MediaKind::ALL {
            println!(
                "{direction} {kind} packets: {}",
                session.relay_stats(RelayId::Packets(direction, kind))
            );
        }
    }

    if remote.frames == 0 && payloads.iter().any(|p| p.kind == MediaKind::Video) {
        return Err("receiver rendered no video".into());
    }
    Ok(())
}

fn receiver_config(payloads: &[PayloadDescriptor], speakers: &str) -> ReceiverConfig {
    let remote = |kind: MediaKind| payloads.iter().find(|p| p.kind == kind).cloned();
    ReceiverConfig {
        audio_output: Some(speakers.to_string()),
        remote_audio: remote(MediaKind::Audio),
        remote_video: remote(MediaKind::Video),
    }
}

fn wait_started(
    session: &MediaSession,
    direction: Direction,
) -> Result<Vec<PayloadDescriptor>, Box<dyn Error>> {
    match wait_for(session, |event| event.direction() == Some(direction))? {
        SessionEvent::Started { payloads, .. } => Ok(payloads),
        SessionEvent::Error { code, .. } => Err(SessionError::GraphConstruction {
            direction,
            kind: code,
        }
        .into()),
        other => Err(format!("unexpected {other:?}").into()),
    }
}

/// Wait for the next lifecycle event matching `accept`.
fn wait_for(
    session: &MediaSession,
    accept: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent, Box<dyn Error>> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match session.next_event(remaining) {
            Some(event) if event.is_lifecycle() && accept(&event) => return Ok(event),
            Some(event) => tracing::trace!(?event, "skipped"),
            None => break,
        }
    }
    Err("timed out waiting for session event".into())
}
