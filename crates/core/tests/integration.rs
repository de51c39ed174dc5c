//! Integration tests: whole sessions running on the synthetic provider.
//!
//! Each test drives a [`MediaSession`] through its public surface only:
//! configure, start, wait for lifecycle events, move packets and frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use avsession::error::ConfigErrorKind;
use avsession::media::rtp::RtpHeader;
use avsession::pipeline::factory;
use avsession::testsrc::{SyntheticProvider, VirtualStream, encode_video, pattern_frame};
use avsession::{
    Direction, MediaKind, MediaSession, PayloadDescriptor, PipelineState, ProducerConfig,
    PushOutcome, ReceiverConfig, RelayId, RenderFrame, RenderSurface, RequestOutcome,
    SessionConfig, SessionError, SessionEvent,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn session_with(provider: SyntheticProvider, config: SessionConfig) -> MediaSession {
    MediaSession::new(Arc::new(provider), config).expect("session")
}

fn session() -> MediaSession {
    session_with(SyntheticProvider::new(), SessionConfig::default())
}

/// Skip frame/packet notifications until a started, stopped or error event.
fn next_lifecycle(session: &MediaSession, timeout: Duration) -> Option<SessionEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let event = session.next_event(remaining)?;
        if event.is_lifecycle() {
            return Some(event);
        }
    }
}

fn wait_started(session: &MediaSession, direction: Direction) -> Vec<PayloadDescriptor> {
    match next_lifecycle(session, EVENT_TIMEOUT) {
        Some(SessionEvent::Started {
            direction: d,
            payloads,
        }) if d == direction => payloads,
        other => panic!("expected {direction} started, got {other:?}"),
    }
}

fn wait_stopped(session: &MediaSession, direction: Direction) {
    match next_lifecycle(session, EVENT_TIMEOUT) {
        Some(SessionEvent::Stopped { direction: d }) if d == direction => {}
        other => panic!("expected {direction} stopped, got {other:?}"),
    }
}

fn poll<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(value) = f() {
            return Some(value);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

fn video_packet(pt: u8, width: u16, height: u16) -> Vec<u8> {
    let mut header = RtpHeader::new(pt, 0x1234);
    let mut data = header.write(true).to_vec();
    data.extend(encode_video(
        width,
        height,
        &pattern_frame(width as u32, height as u32, 0),
    ));
    data
}

#[test]
fn video_producer_negotiates_and_previews() {
    let session = session();
    session
        .configure_producer(ProducerConfig::devices(
            None,
            Some(SyntheticProvider::VIDEO_DEVICE),
        ))
        .unwrap();
    assert_eq!(
        session.start(Direction::Producer).unwrap(),
        RequestOutcome::Accepted
    );

    let payloads = wait_started(&session, Direction::Producer);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].kind, MediaKind::Video);
    assert_eq!(payloads[0].encoding_name, "THEORA");
    assert_eq!(session.local_payload_info(MediaKind::Video), payloads[0]);
    assert!(!session.local_payload_info(MediaKind::Audio).is_negotiated());
    assert_eq!(session.state(Direction::Producer), PipelineState::Running);

    let frame = poll(EVENT_TIMEOUT, || {
        session.pull_frame(Direction::Producer, MediaKind::Video)
    })
    .expect("preview frame");
    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert_eq!(frame.data().len(), 64 * 48 * 4);
    assert!(session.pull_frame(Direction::Producer, MediaKind::Audio).is_none());

    let packet = poll(EVENT_TIMEOUT, || {
        session.pull_packet(Direction::Producer, MediaKind::Video)
    })
    .expect("outbound packet");
    assert_eq!(packet.kind, MediaKind::Video);
    assert_eq!(packet.data[1] & 0x7f, 96);

    session.stop(Direction::Producer).unwrap();
    wait_stopped(&session, Direction::Producer);
    assert_eq!(session.state(Direction::Producer), PipelineState::Idle);
    assert!(!session.local_payload_info(MediaKind::Video).is_negotiated());
}

#[test]
fn stop_twice_emits_one_stopped() {
    let session = session();
    session
        .configure_producer(ProducerConfig::devices(
            Some(SyntheticProvider::AUDIO_DEVICE),
            None,
        ))
        .unwrap();
    session.start(Direction::Producer).unwrap();
    let payloads = wait_started(&session, Direction::Producer);
    assert_eq!(payloads[0].encoding_name, "SPEEX");

    assert!(session.stop(Direction::Producer).unwrap().is_accepted());
    assert!(matches!(
        session.stop(Direction::Producer).unwrap(),
        RequestOutcome::Ignored(_)
    ));
    wait_stopped(&session, Direction::Producer);
    assert!(next_lifecycle(&session, Duration::from_millis(300)).is_none());
}

#[test]
fn second_start_is_ignored() {
    let session = session();
    session
        .configure_producer(ProducerConfig::devices(
            None,
            Some(SyntheticProvider::VIDEO_DEVICE),
        ))
        .unwrap();
    assert!(session.start(Direction::Producer).unwrap().is_accepted());
    assert!(matches!(
        session.start(Direction::Producer).unwrap(),
        RequestOutcome::Ignored(PipelineState::Starting | PipelineState::Running)
    ));
    wait_started(&session, Direction::Producer);
    assert!(next_lifecycle(&session, Duration::from_millis(300)).is_none());
}

#[test]
fn file_producer_attaches_first_decoder_per_kind() {
    let provider = Arc::new(SyntheticProvider::new().with_file(
        "talk.ogg",
        vec![
            VirtualStream::new("audio-0", "audio/x-speex"),
            VirtualStream::new("audio-1", "audio/x-vorbis"),
            VirtualStream::new("video-0", "video/x-theora"),
            VirtualStream::new("subs", "text/x-raw"),
        ],
    ));
    let session = MediaSession::new(provider.clone(), SessionConfig::default()).unwrap();
    session
        .configure_producer(ProducerConfig::file("talk.ogg"))
        .unwrap();
    session.start(Direction::Producer).unwrap();

    let payloads = wait_started(&session, Direction::Producer);
    let names: Vec<_> = payloads.iter().map(|p| p.encoding_name.as_str()).collect();
    assert_eq!(names, vec!["SPEEX", "THEORA"]);

    let created = provider.created_elements();
    assert!(created.iter().any(|e| e == factory::SPEEX_DEC));
    assert!(created.iter().any(|e| e == factory::THEORA_DEC));
    assert!(!created.iter().any(|e| e == factory::VORBIS_DEC));
}

#[test]
fn late_file_stream_gets_a_local_descriptor() {
    let provider = SyntheticProvider::new().with_file(
        "late.ogg",
        vec![
            VirtualStream::new("audio-0", "audio/x-speex"),
            VirtualStream::new("video-0", "video/x-theora")
                .announced_after(Duration::from_millis(30)),
        ],
    );
    let session = session_with(provider, SessionConfig::default());
    session
        .configure_producer(ProducerConfig::file("late.ogg"))
        .unwrap();
    session.start(Direction::Producer).unwrap();

    let payloads = wait_started(&session, Direction::Producer);
    let kinds: Vec<_> = payloads.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
    assert!(session.local_payload_info(MediaKind::Video).is_negotiated());
}

#[test]
fn producer_packets_decode_on_receiver() {
    let config = SessionConfig {
        jitter_latency: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = session_with(SyntheticProvider::new(), config);
    session
        .configure_producer(ProducerConfig::devices(
            None,
            Some(SyntheticProvider::VIDEO_DEVICE),
        ))
        .unwrap();
    session.start(Direction::Producer).unwrap();
    wait_started(&session, Direction::Producer);

    session
        .configure_receiver(ReceiverConfig {
            remote_video: Some(session.local_payload_info(MediaKind::Video)),
            ..ReceiverConfig::default()
        })
        .unwrap();
    session.start(Direction::Receiver).unwrap();
    assert!(wait_started(&session, Direction::Receiver).is_empty());

    let frame = poll(EVENT_TIMEOUT, || {
        while let Some(packet) = session.pull_packet(Direction::Producer, MediaKind::Video) {
            session
                .receive_packet(MediaKind::Video, packet.data)
                .unwrap();
        }
        session.pull_frame(Direction::Receiver, MediaKind::Video)
    })
    .expect("decoded remote frame");
    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert_eq!(session.rejected_frames(Direction::Receiver), 0);

    session.stop(Direction::Receiver).unwrap();
    wait_stopped(&session, Direction::Receiver);
    assert!(matches!(
        session.receive_packet(MediaKind::Video, vec![0u8; 12]),
        Err(SessionError::NotRunning(Direction::Receiver))
    ));
}

#[test]
fn receiver_drops_foreign_payload_type() {
    let session = session();
    session
        .configure_receiver(ReceiverConfig {
            remote_video: Some(PayloadDescriptor::new(
                MediaKind::Video,
                96,
                "THEORA",
            )),
            ..ReceiverConfig::default()
        })
        .unwrap();
    session.start(Direction::Receiver).unwrap();
    wait_started(&session, Direction::Receiver);

    for _ in 0..5 {
        session
            .receive_packet(MediaKind::Video, video_packet(97, 8, 8))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(200));
    assert!(session.pull_frame(Direction::Receiver, MediaKind::Video).is_none());

    session
        .receive_packet(MediaKind::Video, video_packet(96, 8, 8))
        .unwrap();
    let frame = poll(EVENT_TIMEOUT, || {
        session.pull_frame(Direction::Receiver, MediaKind::Video)
    })
    .expect("frame with matching payload type");
    assert_eq!((frame.width(), frame.height()), (8, 8));
}

#[test]
fn receiver_audio_skips_warmup_packets() {
    let config = SessionConfig {
        audio_warmup_skip: 3,
        ..SessionConfig::default()
    };
    let session = session_with(SyntheticProvider::new(), config);
    session
        .configure_receiver(ReceiverConfig {
            audio_output: Some(SyntheticProvider::AUDIO_OUTPUT.to_string()),
            remote_audio: Some(
                PayloadDescriptor::new(MediaKind::Audio, 110, "SPEEX")
                    .with_clock_rate(16000),
            ),
            ..ReceiverConfig::default()
        })
        .unwrap();
    session.start(Direction::Receiver).unwrap();
    wait_started(&session, Direction::Receiver);

    let mut header = RtpHeader::new(110, 7);
    let outcomes: Vec<PushOutcome> = (0..5)
        .map(|_| {
            let mut data = header.write(true).to_vec();
            data.extend_from_slice(&[0u8; 640]);
            session.receive_packet(MediaKind::Audio, data).unwrap()
        })
        .collect();
    assert_eq!(
        outcomes,
        vec![
            PushOutcome::WarmupSkipped,
            PushOutcome::WarmupSkipped,
            PushOutcome::WarmupSkipped,
            PushOutcome::Accepted,
            PushOutcome::Accepted,
        ]
    );
    let stats = session.relay_stats(RelayId::Packets(Direction::Receiver, MediaKind::Audio));
    assert_eq!(stats.warmup_skipped, 3);
    assert_eq!(stats.accepted, 2);
}

#[test]
fn receiver_requires_a_descriptor() {
    let session = session();
    let err = session.start(Direction::Receiver).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Configuration(ConfigErrorKind::MissingRemotePayload)
    ));
    assert_eq!(session.state(Direction::Receiver), PipelineState::Idle);
}

#[test]
fn missing_element_reports_error_event() {
    let session = session_with(
        SyntheticProvider::new().without_element(factory::THEORA_PAY),
        SessionConfig::default(),
    );
    session
        .configure_producer(ProducerConfig::devices(
            None,
            Some(SyntheticProvider::VIDEO_DEVICE),
        ))
        .unwrap();
    session.start(Direction::Producer).unwrap();
    match next_lifecycle(&session, EVENT_TIMEOUT) {
        Some(SessionEvent::Error {
            direction, message, ..
        }) => {
            assert_eq!(direction, Direction::Producer);
            assert!(message.contains(factory::THEORA_PAY));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(session.state(Direction::Producer), PipelineState::Idle);
}

#[test]
fn present_frames_drains_queue() {
    struct Surface {
        shown: Vec<(u32, u32)>,
    }

    impl RenderSurface for Surface {
        fn present(&mut self, frame: &RenderFrame) -> avsession::Result<()> {
            self.shown.push((frame.width(), frame.height()));
            Ok(())
        }
    }

    let session = session_with(
        SyntheticProvider::new().with_video_size(16, 8),
        SessionConfig::default(),
    );
    session
        .configure_producer(ProducerConfig::devices(
            None,
            Some(SyntheticProvider::VIDEO_DEVICE),
        ))
        .unwrap();
    session.start(Direction::Producer).unwrap();
    wait_started(&session, Direction::Producer);

    let mut surface = Surface { shown: Vec::new() };
    poll(EVENT_TIMEOUT, || {
        (session.present_frames(Direction::Producer, &mut surface) > 0).then_some(())
    })
    .expect("presented frames");
    assert!(surface.shown.iter().all(|dims| *dims == (16, 8)));
}
