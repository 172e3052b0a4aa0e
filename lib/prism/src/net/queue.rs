use crate::net::{NetError, NetResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Items a `Mailbox` can carry. Droppable items (media) may be discarded under
/// backpressure; everything else (control, handshake, lifecycle) never is.
pub trait MailItem {
    fn droppable(&self) -> bool;
}

impl MailItem for crate::net::packet::Packet {
    #[inline]
    fn droppable(&self) -> bool {
        self.ptype.is_media()
    }
}

impl MailItem for (crate::ClientId, crate::net::packet::Packet) {
    #[inline]
    fn droppable(&self) -> bool {
        self.1.ptype.is_media()
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO between a session and its owner. The capacity bounds droppable
/// items only; control traffic always enters so shutdown and liveness packets
/// cannot be starved by a full media lane.
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl<T: MailItem> Mailbox<T> {
    pub fn new(capacity: usize) -> Mailbox<T> {
        Mailbox {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    /// Blocking enqueue. Droppable items wait for space (backpressure on the
    /// producer); control items enter immediately.
    pub fn push(&self, item: T) -> NetResult<()> {
        let mut inner = self.inner.lock();

        if item.droppable() {
            while inner.queue.len() >= self.capacity && !inner.closed {
                self.writable.wait(&mut inner);
            }
        }

        if inner.closed {
            return Err(NetError::Closed);
        }

        inner.queue.push_back(item);
        self.readable.notify_one();
        Ok(())
    }

    /// Non-blocking enqueue used by the fan-out path. When the mailbox is at capacity
    /// the oldest droppable item is discarded to make room. Returns whether a drop
    /// occurred.
    pub fn push_or_drop_oldest(&self, item: T) -> NetResult<bool> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(NetError::Closed);
        }

        let mut dropped = false;
        if item.droppable() && inner.queue.len() >= self.capacity {
            if let Some(position) = inner.queue.iter().position(MailItem::droppable) {
                inner.queue.remove(position);
                inner.dropped += 1;
                dropped = true;
            }
        }

        inner.queue.push_back(item);
        self.readable.notify_one();
        Ok(dropped)
    }

    /// Blocking dequeue. `Wait` on timeout, `Closed` once the mailbox is shut down and
    /// fully drained.
    pub fn pop(&self, timeout: Duration) -> NetResult<T> {
        let mut inner = self.inner.lock();

        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.writable.notify_one();
                return Ok(item);
            }

            if inner.closed {
                return Err(NetError::Closed);
            }

            if self.readable.wait_for(&mut inner, timeout).timed_out() {
                return Err(NetError::Wait);
            }
        }
    }

    /// Shuts the mailbox down. Enqueued items remain poppable; producers and idle
    /// consumers are released.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Count of media items discarded by `push_or_drop_oldest`.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::{Packet, PacketType};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn media(tag: u8) -> Packet {
        Packet::new(PacketType::AsciiFrame, vec![tag])
    }

    fn control(tag: u8) -> Packet {
        Packet::new(PacketType::Ping, vec![tag])
    }

    #[test]
    fn test_fifo_order() {
        let mailbox = Mailbox::new(8);

        mailbox.push(media(1)).unwrap();
        mailbox.push(media(2)).unwrap();
        mailbox.push(control(3)).unwrap();

        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![1]);
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![2]);
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![3]);
        assert_eq!(
            mailbox.pop(Duration::from_millis(10)).unwrap_err(),
            NetError::Wait
        );
    }

    #[test]
    fn test_control_bypasses_capacity() {
        let mailbox = Mailbox::new(1);

        mailbox.push(media(1)).unwrap();
        // A full mailbox still accepts control immediately.
        mailbox.push(control(2)).unwrap();

        assert_eq!(mailbox.len(), 2);
    }

    #[test]
    fn test_drop_oldest_media_when_full() {
        let mailbox = Mailbox::new(2);

        mailbox.push(media(1)).unwrap();
        mailbox.push(media(2)).unwrap();

        let dropped = mailbox.push_or_drop_oldest(media(3)).unwrap();
        assert!(dropped);
        assert_eq!(mailbox.dropped(), 1);

        // Oldest media (1) was discarded; order of the rest is preserved.
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![2]);
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![3]);
    }

    #[test]
    fn test_drop_oldest_spares_control() {
        let mailbox = Mailbox::new(2);

        mailbox.push(control(1)).unwrap();
        mailbox.push(media(2)).unwrap();

        let dropped = mailbox.push_or_drop_oldest(media(3)).unwrap();
        assert!(dropped);

        // The control item survives at the head.
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![1]);
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![3]);
    }

    #[test]
    fn test_blocking_push_applies_backpressure() {
        let mailbox = Arc::new(Mailbox::new(1));
        mailbox.push(media(1)).unwrap();

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                let started = Instant::now();
                mailbox.push(media(2)).unwrap();
                started.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![1]);

        let blocked_for = producer.join().unwrap();
        assert!(blocked_for >= Duration::from_millis(30));
        assert_eq!(mailbox.pop(Duration::from_millis(10)).unwrap().body, vec![2]);
    }

    #[test]
    fn test_close_releases_producer_and_consumer() {
        let mailbox: Arc<Mailbox<Packet>> = Arc::new(Mailbox::new(1));
        mailbox.push(media(1)).unwrap();

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.push(media(2)))
        };

        thread::sleep(Duration::from_millis(20));
        mailbox.close();

        assert_eq!(producer.join().unwrap().unwrap_err(), NetError::Closed);

        // Drain the surviving item, then Closed.
        assert!(mailbox.pop(Duration::from_millis(10)).is_ok());
        assert_eq!(
            mailbox.pop(Duration::from_millis(10)).unwrap_err(),
            NetError::Closed
        );
    }

    #[test]
    fn test_push_after_close_fails() {
        let mailbox: Mailbox<Packet> = Mailbox::new(4);
        mailbox.close();

        assert_eq!(mailbox.push(control(1)).unwrap_err(), NetError::Closed);
        assert_eq!(
            mailbox.push_or_drop_oldest(media(2)).unwrap_err(),
            NetError::Closed
        );
    }
}
