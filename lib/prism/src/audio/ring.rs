use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 16_384;
pub const DEFAULT_JITTER: usize = 2_048;

/// Shared state of one single-producer/single-consumer sample ring. Indices grow
/// monotonically and wrap by masking; publication uses acquire/release so samples
/// written before an index store are visible after the matching load.
struct RingShared {
    data: UnsafeCell<Box<[f32]>>,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
    filled_once: AtomicBool,
    jitter: usize,
    mask: usize,
}

// The producer and consumer touch disjoint regions guarded by the indices.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Creates a jitter ring. The capacity must be a power of two; no samples are
/// readable until `jitter` samples have accumulated.
pub fn audio_ring(capacity: usize, jitter: usize) -> (RingProducer, RingConsumer) {
    if !capacity.is_power_of_two() || capacity < 2 {
        panic!("Ring capacity must be a power of two, got {}", capacity);
    }
    if jitter > capacity {
        panic!("Jitter threshold {} exceeds ring capacity {}", jitter, capacity);
    }

    let shared = Arc::new(RingShared {
        data: UnsafeCell::new(vec![0.0f32; capacity].into_boxed_slice()),
        write_index: AtomicUsize::new(0),
        read_index: AtomicUsize::new(0),
        filled_once: AtomicBool::new(false),
        jitter,
        mask: capacity - 1,
    });

    (
        RingProducer {
            shared: shared.clone(),
        },
        RingConsumer { shared },
    )
}

pub fn default_ring() -> (RingProducer, RingConsumer) {
    audio_ring(DEFAULT_CAPACITY, DEFAULT_JITTER)
}

/// Writing half, owned by the socket-side dispatcher.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Copies up to `available_write` samples and returns how many were taken.
    /// Overflow drops the excess; unread data is never overwritten. Never blocks.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let shared = &*self.shared;
        let capacity = shared.capacity();

        let write = shared.write_index.load(Ordering::Relaxed);
        let read = shared.read_index.load(Ordering::Acquire);

        let available = capacity - write.wrapping_sub(read);
        let count = samples.len().min(available);

        if count > 0 {
            let start = write & shared.mask;
            let first = count.min(capacity - start);

            unsafe {
                let data = &mut *shared.data.get();
                data[start..start + first].copy_from_slice(&samples[..first]);

                let second = count - first;
                if second > 0 {
                    data[..second].copy_from_slice(&samples[first..count]);
                }
            }

            shared
                .write_index
                .store(write.wrapping_add(count), Ordering::Release);
        }

        // Arm (or re-arm) the jitter gate once enough samples are queued.
        if write.wrapping_add(count).wrapping_sub(read) >= shared.jitter {
            shared.filled_once.store(true, Ordering::Release);
        }

        count
    }

    #[inline]
    pub fn available_write(&self) -> usize {
        let shared = &*self.shared;
        let write = shared.write_index.load(Ordering::Relaxed);
        let read = shared.read_index.load(Ordering::Acquire);
        shared.capacity() - write.wrapping_sub(read)
    }
}

/// Reading half, owned by the mixer.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    /// Copies up to `available_read` samples. Returns 0 during the jitter pre-fill;
    /// draining the ring empty re-arms the pre-fill so a stalled source goes back to
    /// silence instead of stuttering.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let shared = &*self.shared;

        if !shared.filled_once.load(Ordering::Acquire) {
            return 0;
        }

        let read = shared.read_index.load(Ordering::Relaxed);
        let write = shared.write_index.load(Ordering::Acquire);

        let available = write.wrapping_sub(read);
        if available == 0 {
            shared.filled_once.store(false, Ordering::Release);
            return 0;
        }

        let count = out.len().min(available);
        let capacity = shared.capacity();
        let start = read & shared.mask;
        let first = count.min(capacity - start);

        unsafe {
            let data = &*shared.data.get();
            out[..first].copy_from_slice(&data[start..start + first]);

            let second = count - first;
            if second > 0 {
                out[first..count].copy_from_slice(&data[..second]);
            }
        }

        shared
            .read_index
            .store(read.wrapping_add(count), Ordering::Release);

        count
    }

    #[inline]
    pub fn available_read(&self) -> usize {
        let shared = &*self.shared;
        let read = shared.read_index.load(Ordering::Relaxed);
        let write = shared.write_index.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_read_before_prefill_returns_zero() {
        let (_producer, mut consumer) = audio_ring(16_384, 2_048);

        let mut out = vec![0.0f32; 1_024];
        assert_eq!(consumer.read(&mut out), 0);
    }

    #[test]
    fn test_prefill_then_drain_then_rearm() {
        let (mut producer, mut consumer) = audio_ring(16_384, 2_048);

        let samples: Vec<f32> = (0..2_049).map(|idx| idx as f32).collect();
        assert_eq!(producer.write(&samples), 2_049);

        // One past the jitter threshold: everything is readable at once.
        let mut out = vec![0.0f32; 2_049];
        assert_eq!(consumer.read(&mut out), 2_049);
        assert_eq!(out, samples);

        // Drained: the next read returns zero and re-arms the pre-fill.
        let mut one = [0.0f32; 1];
        assert_eq!(consumer.read(&mut one), 0);

        // Below the threshold nothing is readable again.
        let trickle = vec![1.0f32; 2_047];
        assert_eq!(producer.write(&trickle), 2_047);
        assert_eq!(consumer.read(&mut one), 0);

        // Crossing the threshold reopens the gate.
        assert_eq!(producer.write(&[2.0f32]), 1);
        let mut out = vec![0.0f32; 2_048];
        assert_eq!(consumer.read(&mut out), 2_048);
    }

    #[test]
    fn test_zero_length_requests() {
        let (mut producer, mut consumer) = audio_ring(64, 4);

        assert_eq!(producer.write(&[]), 0);

        producer.write(&[0.5f32; 8]);
        assert_eq!(consumer.read(&mut []), 0);
    }

    #[test]
    fn test_overflow_drops_excess() {
        let (mut producer, mut consumer) = audio_ring(16, 4);

        let samples: Vec<f32> = (0..24).map(|idx| idx as f32).collect();
        assert_eq!(producer.write(&samples), 16);
        assert_eq!(producer.available_write(), 0);

        // The first 16 samples survive untouched.
        let mut out = vec![0.0f32; 16];
        assert_eq!(consumer.read(&mut out), 16);
        assert_eq!(out, &samples[..16]);
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let (mut producer, mut consumer) = audio_ring(16, 1);

        // Advance the indices into the middle of the ring.
        producer.write(&[0.0; 10]);
        let mut out = vec![0.0f32; 10];
        consumer.read(&mut out);

        // This write crosses the end of the backing array.
        let samples: Vec<f32> = (0..12).map(|idx| 100.0 + idx as f32).collect();
        assert_eq!(producer.write(&samples), 12);

        let mut out = vec![0.0f32; 12];
        assert_eq!(consumer.read(&mut out), 12);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_available_counters() {
        let (mut producer, consumer) = audio_ring(32, 4);

        assert_eq!(producer.available_write(), 32);
        assert_eq!(consumer.available_read(), 0);

        producer.write(&[1.0; 12]);

        assert_eq!(producer.available_write(), 20);
        assert_eq!(consumer.available_read(), 12);
    }

    #[test]
    fn test_spsc_reads_are_a_prefix_of_writes() {
        // Jitter of one so the tail of the stream cannot be gated off.
        let (mut producer, mut consumer) = audio_ring(1_024, 1);

        const TOTAL: usize = 200_000;

        let writer = thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                let end = (next + 331).min(TOTAL);
                let chunk: Vec<f32> = (next..end).map(|v| v as f32).collect();

                let mut offset = 0;
                while offset < chunk.len() {
                    let written = producer.write(&chunk[offset..]);
                    offset += written;
                    if written == 0 {
                        thread::yield_now();
                    }
                }

                next = end;
            }
        });

        let mut expected = 0usize;
        let mut out = vec![0.0f32; 257];
        while expected < TOTAL {
            let count = consumer.read(&mut out);
            for sample in &out[..count] {
                assert_eq!(*sample, expected as f32);
                expected += 1;
            }
            if count == 0 {
                thread::yield_now();
            }
        }

        writer.join().unwrap();
    }
}
