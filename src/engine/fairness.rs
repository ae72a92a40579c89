// Round-robin gate across the per-codec queues: only the codec at the
// head of the ring may start new work

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::job::CodecFamily;

/// Ordered set of codecs with pending work, guarded by one lock.
/// Transitions: `arrived` appends a codec that is not already queued;
/// `drained` removes it; the head of the ring is the current codec.
/// Workers for a non-current codec park until their turn comes around.
#[derive(Default)]
pub struct FairnessRing {
    order: Mutex<VecDeque<CodecFamily>>,
    cond: Condvar,
}

impl FairnessRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that work for `codec` exists; re-appends a codec that had
    /// previously drained
    pub fn arrived(&self, codec: CodecFamily) {
        let mut order = self.order.lock().unwrap();
        if !order.contains(&codec) {
            order.push_back(codec);
            self.cond.notify_all();
        }
    }

    /// The codec's queue emptied; hand the turn to the next in line
    pub fn drained(&self, codec: CodecFamily) {
        let mut order = self.order.lock().unwrap();
        order.retain(|c| *c != codec);
        self.cond.notify_all();
    }

    pub fn current(&self) -> Option<CodecFamily> {
        self.order.lock().unwrap().front().copied()
    }

    pub fn is_current(&self, codec: CodecFamily) -> bool {
        self.current() == Some(codec)
    }

    /// Park until `codec` reaches the head of the ring, re-checking on
    /// every change. `cancelled` is polled so a shutdown can release
    /// waiting workers. `head_idle` reports whether the head codec's
    /// queue is actually empty: two workers of one codec finishing at
    /// the same instant can each leave the `drained` call to the
    /// other, so a waiter evicts an idle head itself rather than
    /// trusting the signal. A waiter also re-asserts its own codec's
    /// membership, since holding a job for it is proof of work.
    pub fn wait_until_current<F, G>(&self, codec: CodecFamily, cancelled: F, head_idle: G)
    where
        F: Fn() -> bool,
        G: Fn(CodecFamily) -> bool,
    {
        let mut order = self.order.lock().unwrap();
        while order.front() != Some(&codec) && !cancelled() {
            if !order.contains(&codec) {
                order.push_back(codec);
                continue;
            }
            if let Some(&head) = order.front() {
                if head_idle(head) {
                    order.pop_front();
                    self.cond.notify_all();
                    continue;
                }
            }
            // The timeout bounds how long a missed notification (or a
            // head that went idle after the check above) can hold us
            let (guard, _) = self
                .cond
                .wait_timeout(order, Duration::from_millis(200))
                .unwrap();
            order = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_arrival_order_is_service_order() {
        let ring = FairnessRing::new();
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::Vp9);
        ring.arrived(CodecFamily::X265);

        assert_eq!(ring.current(), Some(CodecFamily::X264));
        ring.drained(CodecFamily::X264);
        assert_eq!(ring.current(), Some(CodecFamily::Vp9));
        ring.drained(CodecFamily::Vp9);
        assert_eq!(ring.current(), Some(CodecFamily::X265));
        ring.drained(CodecFamily::X265);
        assert_eq!(ring.current(), None);
    }

    #[test]
    fn test_rearrival_goes_to_the_back() {
        let ring = FairnessRing::new();
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::Vp9);

        // x264 drains, then new x264 work shows up while vp9 is current
        ring.drained(CodecFamily::X264);
        ring.arrived(CodecFamily::X264);

        assert_eq!(ring.current(), Some(CodecFamily::Vp9));
        ring.drained(CodecFamily::Vp9);
        assert_eq!(ring.current(), Some(CodecFamily::X264));
    }

    #[test]
    fn test_duplicate_arrivals_collapse() {
        let ring = FairnessRing::new();
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::X264);
        ring.drained(CodecFamily::X264);
        assert_eq!(ring.current(), None);
    }

    #[test]
    fn test_waiter_released_on_turn() {
        let ring = Arc::new(FairnessRing::new());
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::Vp9);

        let ring2 = ring.clone();
        let released = Arc::new(AtomicBool::new(false));
        let released2 = released.clone();
        let waiter = thread::spawn(move || {
            ring2.wait_until_current(CodecFamily::Vp9, || false, |_| false);
            released2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!released.load(Ordering::SeqCst));

        ring.drained(CodecFamily::X264);
        waiter.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_idle_head_is_evicted_by_a_waiter() {
        let ring = FairnessRing::new();
        ring.arrived(CodecFamily::X264);

        // x264's queue emptied without anyone calling drained (both of
        // its workers finished at once), and vp9 was never announced;
        // the vp9 waiter must recover on its own without blocking
        ring.wait_until_current(CodecFamily::Vp9, || false, |head| {
            head == CodecFamily::X264
        });
        assert_eq!(ring.current(), Some(CodecFamily::Vp9));
    }

    #[test]
    fn test_busy_head_is_not_evicted() {
        let ring = Arc::new(FairnessRing::new());
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::Vp9);

        let ring2 = ring.clone();
        let released = Arc::new(AtomicBool::new(false));
        let released2 = released.clone();
        let waiter = thread::spawn(move || {
            ring2.wait_until_current(CodecFamily::Vp9, || false, |_| false);
            released2.store(true, Ordering::SeqCst);
        });

        // With the head still reporting work the waiter stays parked
        thread::sleep(Duration::from_millis(300));
        assert!(!released.load(Ordering::SeqCst));

        ring.drained(CodecFamily::X264);
        waiter.join().unwrap();
    }

    #[test]
    fn test_waiter_released_on_cancel() {
        let ring = Arc::new(FairnessRing::new());
        ring.arrived(CodecFamily::X264);
        ring.arrived(CodecFamily::Vp9);

        let cancel = Arc::new(AtomicBool::new(false));
        let (ring2, cancel2) = (ring.clone(), cancel.clone());
        let waiter = thread::spawn(move || {
            ring2.wait_until_current(
                CodecFamily::Vp9,
                move || cancel2.load(Ordering::SeqCst),
                |_| false,
            );
        });

        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::SeqCst);
        waiter.join().unwrap();
    }
}
