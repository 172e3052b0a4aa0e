//! Stand-in capture and playback devices. Real webcam/microphone/terminal I/O
//! lives outside the core; these implementations keep the pipeline observable
//! on any machine.

use prism::net::packet::{AsciiFrame, Roster};
use prism::pipeline::{AudioSink, AudioSource, VideoSink, VideoSource};
use prism::ClientId;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

/// Scrolling gradient rendered from the configured palette, paced at a fixed
/// frame rate. Stands in for webcam capture.
pub struct TestPatternSource {
    width: u16,
    height: u16,
    palette: Vec<u8>,
    frame_interval: Duration,
    tick: u64,
}

impl TestPatternSource {
    pub fn new(width: u16, height: u16, palette: &str, fps: u32) -> TestPatternSource {
        let palette = if palette.is_empty() {
            b" .:-=+*#%@".to_vec()
        } else {
            palette.as_bytes().to_vec()
        };

        TestPatternSource {
            width,
            height,
            palette,
            frame_interval: Duration::from_millis(1_000 / u64::from(fps.max(1))),
            tick: 0,
        }
    }
}

impl VideoSource for TestPatternSource {
    fn next_frame(&mut self) -> Option<AsciiFrame> {
        thread::sleep(self.frame_interval);

        let width = usize::from(self.width);
        let height = usize::from(self.height);

        let mut payload = Vec::with_capacity((width + 1) * height);
        for row in 0..height {
            for col in 0..width {
                let phase = (col + row + self.tick as usize) % self.palette.len();
                payload.push(self.palette[phase]);
            }
            payload.push(b'\n');
        }

        self.tick = self.tick.wrapping_add(1);

        Some(AsciiFrame {
            width: self.width,
            height: self.height,
            payload,
        })
    }
}

/// Silence paced at the audio frame cadence. Stands in for microphone capture.
pub struct SilenceSource {
    block_interval: Duration,
}

impl SilenceSource {
    pub fn new(sample_rate: u32, frame_samples: usize) -> SilenceSource {
        let micros = (frame_samples as u64 * 1_000_000) / u64::from(sample_rate.max(1));
        SilenceSource {
            block_interval: Duration::from_micros(micros.max(1_000)),
        }
    }
}

impl AudioSource for SilenceSource {
    fn next_block(&mut self, out: &mut [f32]) -> bool {
        thread::sleep(self.block_interval);
        for sample in out.iter_mut() {
            *sample = 0.0;
        }
        true
    }
}

/// Writes incoming frames straight to the terminal, latest frame wins.
pub struct TerminalSink {
    roster_line: String,
}

impl TerminalSink {
    pub fn new() -> TerminalSink {
        TerminalSink {
            roster_line: String::new(),
        }
    }
}

impl VideoSink for TerminalSink {
    fn present(&mut self, source: ClientId, frame: &AsciiFrame) {
        let stdout = io::stdout();
        let mut out = stdout.lock();

        // Home the cursor rather than clearing, to avoid flicker.
        let _ = write!(out, "\x1b[H");
        let _ = writeln!(out, "[{}] {}x{}  {}", source, frame.width, frame.height, self.roster_line);
        let _ = out.write_all(&frame.payload);
        let _ = out.flush();
    }

    fn roster_changed(&mut self, roster: &Roster) {
        let names: Vec<&str> = roster
            .members
            .iter()
            .map(|member| member.name.as_str())
            .collect();
        self.roster_line = names.join(", ");
    }
}

/// Discards the mix. Stands in for the audio output device.
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play(&mut self, _samples: &[f32]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frames_have_expected_shape() {
        let mut source = TestPatternSource::new(8, 3, " .:", 1_000);

        let frame = source.next_frame().unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 3);
        // Eight columns plus a newline per row.
        assert_eq!(frame.payload.len(), 9 * 3);

        // The pattern scrolls between frames.
        let next = source.next_frame().unwrap();
        assert_ne!(frame.payload, next.payload);
    }

    #[test]
    fn test_silence_source_fills_zeros() {
        let mut source = SilenceSource::new(48_000, 64);
        let mut block = vec![1.0f32; 64];

        assert!(source.next_block(&mut block));
        assert!(block.iter().all(|sample| *sample == 0.0));
    }
}
