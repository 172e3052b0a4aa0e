use crate::audio::ring::RingConsumer;
use crate::ClientId;
use hashbrown::HashMap;

/// Sums one frame's worth of samples from every remote source's jitter ring.
/// Sources still in pre-fill contribute silence. Owned by the playback thread;
/// each ring's consumer half lives here so the SPSC discipline holds.
pub struct Mixer {
    sources: HashMap<ClientId, RingConsumer>,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new() -> Mixer {
        Mixer {
            sources: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    pub fn add_source(&mut self, id: ClientId, consumer: RingConsumer) {
        self.sources.insert(id, consumer);
    }

    /// Idempotent; mixing continues over the remaining sources.
    pub fn remove_source(&mut self, id: ClientId) {
        self.sources.remove(&id);
    }

    #[inline]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    pub fn has_source(&self, id: ClientId) -> bool {
        self.sources.contains_key(&id)
    }

    /// Fills `out` with the saturating sum of all sources. Rings with fewer samples
    /// than the frame contribute what they have; the remainder stays silent.
    pub fn mix_into(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = 0.0;
        }

        if self.scratch.len() < out.len() {
            self.scratch.resize(out.len(), 0.0);
        }

        for ring in self.sources.values_mut() {
            let count = ring.read(&mut self.scratch[..out.len()]);
            for idx in 0..count {
                out[idx] += self.scratch[idx];
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.max(-1.0).min(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring::audio_ring;

    #[test]
    fn test_mix_sums_two_sources() {
        let mut mixer = Mixer::new();

        let (mut producer_a, consumer_a) = audio_ring(64, 1);
        let (mut producer_b, consumer_b) = audio_ring(64, 1);

        producer_a.write(&[0.25; 8]);
        producer_b.write(&[0.5; 8]);

        mixer.add_source(1, consumer_a);
        mixer.add_source(2, consumer_b);

        let mut out = [0.0f32; 8];
        mixer.mix_into(&mut out);

        for sample in &out {
            assert!((sample - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_saturates() {
        let mut mixer = Mixer::new();

        let (mut producer_a, consumer_a) = audio_ring(64, 1);
        let (mut producer_b, consumer_b) = audio_ring(64, 1);

        producer_a.write(&[0.9; 4]);
        producer_b.write(&[0.9; 4]);

        mixer.add_source(1, consumer_a);
        mixer.add_source(2, consumer_b);

        let mut out = [0.0f32; 4];
        mixer.mix_into(&mut out);

        for sample in &out {
            assert!((sample - 1.0).abs() < 1e-6);
        }

        // Negative saturation too.
        let (mut producer_c, consumer_c) = audio_ring(64, 1);
        producer_c.write(&[-3.0; 4]);

        let mut lone = Mixer::new();
        lone.add_source(3, consumer_c);

        let mut out = [0.0f32; 4];
        lone.mix_into(&mut out);
        for sample in &out {
            assert!((sample + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_prefill_source_is_silent() {
        let mut mixer = Mixer::new();

        let (mut producer, consumer) = audio_ring(4_096, 2_048);
        producer.write(&[0.8; 100]);

        mixer.add_source(1, consumer);

        let mut out = [0.1f32; 16];
        mixer.mix_into(&mut out);

        for sample in &out {
            assert_eq!(*sample, 0.0);
        }
    }

    #[test]
    fn test_short_ring_pads_with_silence() {
        let mut mixer = Mixer::new();

        let (mut producer, consumer) = audio_ring(64, 1);
        producer.write(&[0.5; 4]);

        mixer.add_source(1, consumer);

        let mut out = [0.0f32; 8];
        mixer.mix_into(&mut out);

        for sample in &out[..4] {
            assert!((sample - 0.5).abs() < 1e-6);
        }
        for sample in &out[4..] {
            assert_eq!(*sample, 0.0);
        }
    }

    #[test]
    fn test_remove_source_is_idempotent() {
        let mut mixer = Mixer::new();

        let (_producer, consumer) = audio_ring(64, 1);
        mixer.add_source(1, consumer);

        mixer.remove_source(1);
        mixer.remove_source(1);

        assert_eq!(mixer.source_count(), 0);
    }
}
