//! Client-side orchestration: capture → encode → send, receive → decode →
//! render/play. Device I/O stays behind the source/sink traits; the pipeline
//! owns the per-source jitter rings and the mixer cadence.

use crate::audio::mixer::Mixer;
use crate::audio::ring::{audio_ring, RingConsumer, RingProducer};
use crate::net::channel::{CloseReason, Session, SessionEvent};
use crate::net::packet::{self, AsciiFrame, ImageFrame, Packet, PacketType, Roster};
use crate::net::NetError;
use crate::ClientId;
use crossbeam_channel as channel;
use hashbrown::HashMap;
use quartz::logging::{self, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const RECV_TICK: Duration = Duration::from_millis(250);

/// Produces outgoing video frames, paced by the implementation. `None` ends capture.
pub trait VideoSource: Send {
    fn next_frame(&mut self) -> Option<AsciiFrame>;
}

/// Fills one block of outgoing samples. `false` ends capture.
pub trait AudioSource: Send {
    fn next_block(&mut self, out: &mut [f32]) -> bool;
}

/// Receives decoded remote video.
pub trait VideoSink: Send {
    fn present(&mut self, source: ClientId, frame: &AsciiFrame);

    fn present_image(&mut self, _source: ClientId, _frame: &ImageFrame) {}

    fn roster_changed(&mut self, _roster: &Roster) {}
}

/// Receives the mixed audio output.
pub trait AudioSink: Send {
    fn play(&mut self, samples: &[f32]);
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub display_name: String,
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub ring_capacity: usize,
    pub jitter_samples: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &quartz::config::Config) -> PipelineConfig {
        PipelineConfig {
            display_name: config.client.name.clone(),
            sample_rate: config.audio.sample_rate,
            frame_samples: config.audio.frame_samples,
            ring_capacity: config.audio.ring_capacity,
            jitter_samples: config.audio.jitter_samples,
        }
    }
}

enum MixerCmd {
    Add(ClientId, RingConsumer),
    Remove(ClientId),
}

/// Runs the full client pipeline over an established session until it closes.
/// Returns the close reason for exit-code mapping.
pub fn run(
    session: Session,
    video_source: Box<dyn VideoSource>,
    audio_source: Box<dyn AudioSource>,
    video_sink: Box<dyn VideoSink>,
    audio_sink: Box<dyn AudioSink>,
    config: PipelineConfig,
    log: &Logger,
) -> CloseReason {
    // The handshake must finish before anything else happens.
    loop {
        match session.recv(RECV_TICK) {
            Ok(SessionEvent::Ready(_)) => break,
            Ok(SessionEvent::Closed(reason)) => return reason,
            Ok(SessionEvent::Packet { .. }) => {
                return CloseReason::Protocol(crate::net::ProtocolError::UnexpectedType)
            }
            Err(NetError::Wait) => continue,
            Err(_) => return session.close_reason().unwrap_or(CloseReason::Requested),
        }
    }

    // Introduce ourselves; the server's roster follows.
    let hello = Packet::new(
        PacketType::Hello,
        packet::encode_hello(&packet::Hello {
            proto: quartz::PROTOCOL_VERSION,
            name: config.display_name.clone(),
        }),
    );
    if session.send(hello).is_err() {
        return session.close_reason().unwrap_or(CloseReason::Requested);
    }

    let running = Arc::new(AtomicBool::new(true));
    let (mixer_tx, mixer_rx) = channel::unbounded::<MixerCmd>();

    let video_thread = spawn_video_capture(&session, video_source, running.clone(), log);
    let audio_thread = spawn_audio_capture(&session, audio_source, running.clone(), &config, log);
    let mixer_thread = spawn_mixer(audio_sink, mixer_rx, running.clone(), &config);

    let reason = dispatch_loop(&session, video_sink, &mixer_tx, &config, log);

    running.store(false, Ordering::Release);
    session.close();

    let _ = video_thread.join();
    let _ = audio_thread.join();
    let _ = mixer_thread.join();

    reason
}

fn spawn_video_capture(
    session: &Session,
    mut source: Box<dyn VideoSource>,
    running: Arc<AtomicBool>,
    log: &Logger,
) -> thread::JoinHandle<()> {
    let sender = session.sender();
    let log = log.new(logging::o!("task" => "video-capture"));

    thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            let frame = match source.next_frame() {
                Some(frame) => frame,
                None => break,
            };

            let pkt = Packet::new(
                PacketType::AsciiFrame,
                packet::encode_ascii_frame(frame.width, frame.height, &frame.payload),
            );

            // Backpressure: block until the outbound queue has room.
            if sender.send(pkt).is_err() {
                break;
            }
        }

        logging::trace!(log, "video capture stopped");
    })
}

fn spawn_audio_capture(
    session: &Session,
    mut source: Box<dyn AudioSource>,
    running: Arc<AtomicBool>,
    config: &PipelineConfig,
    log: &Logger,
) -> thread::JoinHandle<()> {
    let sender = session.sender();
    let frame_samples = config.frame_samples;
    let log = log.new(logging::o!("task" => "audio-capture"));

    thread::spawn(move || {
        let mut block = vec![0.0f32; frame_samples];
        let mut seq: u64 = 0;

        while running.load(Ordering::Acquire) {
            if !source.next_block(&mut block) {
                break;
            }

            let pkt = Packet::new(PacketType::AudioFrame, packet::encode_audio_frame(seq, &block));
            seq = seq.wrapping_add(1);

            if sender.send(pkt).is_err() {
                break;
            }
        }

        logging::trace!(log, "audio capture stopped");
    })
}

fn spawn_mixer(
    mut sink: Box<dyn AudioSink>,
    commands: channel::Receiver<MixerCmd>,
    running: Arc<AtomicBool>,
    config: &PipelineConfig,
) -> thread::JoinHandle<()> {
    let frame_samples = config.frame_samples;
    let period_us = (frame_samples as u64 * 1_000_000) / u64::from(config.sample_rate.max(1));
    let period = Duration::from_micros(period_us.max(1_000));

    thread::spawn(move || {
        let mut mixer = Mixer::new();
        let mut out = vec![0.0f32; frame_samples];
        let ticker = channel::tick(period);

        while running.load(Ordering::Acquire) {
            while let Ok(cmd) = commands.try_recv() {
                match cmd {
                    MixerCmd::Add(id, consumer) => mixer.add_source(id, consumer),
                    MixerCmd::Remove(id) => mixer.remove_source(id),
                }
            }

            if ticker.recv_timeout(period * 4).is_err() {
                continue;
            }

            mixer.mix_into(&mut out);
            sink.play(&out);
        }
    })
}

/// Receives session events and fans them into the sinks and rings. Runs on the
/// caller's thread; returns once the session closes.
fn dispatch_loop(
    session: &Session,
    mut video_sink: Box<dyn VideoSink>,
    mixer_tx: &channel::Sender<MixerCmd>,
    config: &PipelineConfig,
    log: &Logger,
) -> CloseReason {
    let mut producers: HashMap<ClientId, RingProducer> = HashMap::new();

    loop {
        let (source, pkt) = match session.recv(RECV_TICK) {
            Ok(SessionEvent::Packet { source, packet }) => (source, packet),
            Ok(SessionEvent::Closed(reason)) => return reason,
            Ok(SessionEvent::Ready(_)) => continue,
            Err(NetError::Wait) => continue,
            Err(_) => return session.close_reason().unwrap_or(CloseReason::Requested),
        };

        match pkt.ptype {
            PacketType::AsciiFrame => match packet::decode_ascii_frame(&pkt.body) {
                Ok(frame) => video_sink.present(source, &frame),
                Err(err) => {
                    logging::warn!(log, "bad video frame"; "source" => source, "error" => %err);
                    return CloseReason::from_error(err);
                }
            },
            PacketType::ImageFrame => match packet::decode_image_frame(&pkt.body) {
                Ok(frame) => video_sink.present_image(source, &frame),
                Err(err) => {
                    logging::warn!(log, "bad image frame"; "source" => source, "error" => %err);
                    return CloseReason::from_error(err);
                }
            },
            PacketType::AudioFrame => match packet::decode_audio_frame(&pkt.body) {
                Ok(frame) => {
                    let producer = producers.entry(source).or_insert_with(|| {
                        let (producer, consumer) =
                            audio_ring(config.ring_capacity, config.jitter_samples);
                        let _ = mixer_tx.send(MixerCmd::Add(source, consumer));
                        producer
                    });

                    // Overrun policy: the ring drops the excess, not the history.
                    producer.write(&frame.samples);
                }
                Err(err) => {
                    logging::warn!(log, "bad audio frame"; "source" => source, "error" => %err);
                    return CloseReason::from_error(err);
                }
            },
            PacketType::Roster => match packet::decode_roster(&pkt.body) {
                Ok(roster) => {
                    video_sink.roster_changed(&roster);

                    // Drop rings for departed members.
                    let current: Vec<ClientId> = producers.keys().copied().collect();
                    for id in current {
                        if !roster.members.iter().any(|member| member.id == id) {
                            producers.remove(&id);
                            let _ = mixer_tx.send(MixerCmd::Remove(id));
                        }
                    }
                }
                Err(err) => {
                    logging::warn!(log, "bad roster"; "error" => %err);
                    return CloseReason::from_error(err);
                }
            },
            // Roster stays authoritative; the deltas are informational.
            PacketType::Join | PacketType::Leave => (),
            PacketType::Error => {
                if let Ok(info) = packet::decode_error(&pkt.body) {
                    logging::warn!(log, "server error"; "code" => info.code, "message" => &info.message);
                }
            }
            PacketType::Unknown(code) => {
                logging::debug!(log, "ignoring unknown packet"; "code" => code);
            }
            other => {
                logging::debug!(log, "unexpected packet"; "type" => ?other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::channel::{Session, SessionConfig};
    use crate::net::handshake::AuthConfig;
    use parking_lot::Mutex;
    use std::net::TcpListener;
    use std::time::Instant;

    struct ScriptedVideo {
        frames: Vec<AsciiFrame>,
    }

    impl VideoSource for ScriptedVideo {
        fn next_frame(&mut self) -> Option<AsciiFrame> {
            if self.frames.is_empty() {
                // Capture ends; the rest of the pipeline stays up.
                return None;
            }
            Some(self.frames.remove(0))
        }
    }

    struct SilentAudio;

    impl AudioSource for SilentAudio {
        fn next_block(&mut self, _out: &mut [f32]) -> bool {
            false
        }
    }

    #[derive(Clone, Default)]
    struct RecordingVideoSink {
        frames: Arc<Mutex<Vec<(ClientId, AsciiFrame)>>>,
        rosters: Arc<Mutex<Vec<Roster>>>,
    }

    impl VideoSink for RecordingVideoSink {
        fn present(&mut self, source: ClientId, frame: &AsciiFrame) {
            self.frames.lock().push((source, frame.clone()));
        }

        fn roster_changed(&mut self, roster: &Roster) {
            self.rosters.lock().push(roster.clone());
        }
    }

    #[derive(Clone, Default)]
    struct RecordingAudioSink {
        peak: Arc<Mutex<f32>>,
    }

    impl AudioSink for RecordingAudioSink {
        fn play(&mut self, samples: &[f32]) {
            let mut peak = self.peak.lock();
            for sample in samples {
                if sample.abs() > *peak {
                    *peak = sample.abs();
                }
            }
        }
    }

    fn session_pair() -> (Session, Session) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let config = SessionConfig {
            handshake_budget: Duration::from_secs(5),
            ..SessionConfig::default()
        };

        let client_config = config.clone();
        let client = thread::spawn(move || {
            Session::connect(
                &addr,
                AuthConfig::Password("test".to_string()),
                client_config,
                &logging::discard(),
            )
            .unwrap()
        });

        let (stream, _) = listener.accept().unwrap();
        let server = Session::accept(
            stream,
            AuthConfig::Password("test".to_string()),
            config,
            &logging::discard(),
        )
        .unwrap();

        (server, client.join().unwrap())
    }

    fn test_pipeline_config() -> PipelineConfig {
        PipelineConfig {
            display_name: "tester".to_string(),
            sample_rate: 48_000,
            frame_samples: 128,
            ring_capacity: 1_024,
            jitter_samples: 64,
        }
    }

    fn wait_server_event<F: Fn(&SessionEvent) -> bool>(
        session: &Session,
        accept: F,
    ) -> SessionEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match session.recv(Duration::from_millis(50)) {
                Ok(event) => {
                    if accept(&event) {
                        return event;
                    }
                }
                Err(NetError::Wait) => continue,
                Err(err) => panic!("server session error {:?}", err),
            }
        }
        panic!("expected event never arrived");
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let (server, client) = session_pair();

        let video_sink = RecordingVideoSink::default();
        let audio_sink = RecordingAudioSink::default();
        let sink_frames = video_sink.frames.clone();
        let sink_peak = audio_sink.peak.clone();

        let captured = AsciiFrame {
            width: 4,
            height: 1,
            payload: b"####".to_vec(),
        };

        let pipeline = {
            let frame = captured.clone();
            thread::spawn(move || {
                run(
                    client,
                    Box::new(ScriptedVideo {
                        frames: vec![frame],
                    }),
                    Box::new(SilentAudio),
                    Box::new(video_sink),
                    Box::new(audio_sink),
                    test_pipeline_config(),
                    &logging::discard(),
                )
            })
        };

        // Server side: handshake, then the introduction.
        wait_server_event(&server, |event| matches!(event, SessionEvent::Ready(_)));
        let hello_event = wait_server_event(&server, |event| {
            matches!(
                event,
                SessionEvent::Packet { packet, .. } if packet.ptype == PacketType::Hello
            )
        });
        if let SessionEvent::Packet { packet, .. } = &hello_event {
            let hello = packet::decode_hello(&packet.body).unwrap();
            assert_eq!(hello.name, "tester");
        }

        // The captured frame arrives on the server.
        let frame_event = wait_server_event(&server, |event| {
            matches!(
                event,
                SessionEvent::Packet { packet, .. } if packet.ptype == PacketType::AsciiFrame
            )
        });
        if let SessionEvent::Packet { packet, .. } = &frame_event {
            let frame = packet::decode_ascii_frame(&packet.body).unwrap();
            assert_eq!(frame.payload, b"####");
        }

        // Remote media fans in: a frame and enough audio to pass the jitter gate.
        let sender = server.sender();
        let remote_frame = Packet::new(
            PacketType::AsciiFrame,
            packet::encode_ascii_frame(2, 1, b".."),
        );
        sender.route(7, remote_frame).unwrap();

        for seq in 0..4u64 {
            let samples = vec![0.25f32; 128];
            let audio = Packet::new(
                PacketType::AudioFrame,
                packet::encode_audio_frame(seq, &samples),
            );
            sender.route(7, audio).unwrap();
        }

        // Give the dispatcher and the mixer a moment.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let seen_frame = sink_frames
                .lock()
                .iter()
                .any(|(source, frame)| *source == 7 && frame.payload == b"..");
            let heard = *sink_peak.lock() > 0.0;

            if seen_frame && heard {
                break;
            }
            if Instant::now() > deadline {
                panic!(
                    "pipeline did not surface media (frame: {}, audio peak: {})",
                    seen_frame,
                    *sink_peak.lock()
                );
            }
            thread::sleep(Duration::from_millis(20));
        }

        // Server departs; the pipeline returns the close reason.
        server.close();
        let reason = pipeline.join().unwrap();
        assert_eq!(reason, CloseReason::ByeReceived);
    }
}
