// One scheduling tier: a blocking job queue drained by a fixed pool of
// worker threads, torn down with one sentinel per worker

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::job::Job;

pub enum QueueMsg {
    Job(Arc<Job>),
    /// Poison value: the receiving worker exits its loop
    Shutdown,
}

/// Queued-plus-running work counter, used for drain waits
#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Inflight {
    fn inc(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn dec(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cond.wait(count).unwrap();
        }
    }

    fn is_zero(&self) -> bool {
        *self.count.lock().unwrap() == 0
    }
}

#[derive(Default)]
struct ChannelState {
    items: VecDeque<QueueMsg>,
    closed: bool,
}

/// FIFO of pending messages. Workers park on the condvar when empty,
/// which releases the lock, so the queue can always be drained even
/// while every worker is idle.
#[derive(Default)]
struct Channel {
    state: Mutex<ChannelState>,
    cond: Condvar,
}

impl Channel {
    /// Returns false once the channel is closed
    fn push(&self, msg: QueueMsg) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        state.items.push_back(msg);
        self.cond.notify_one();
        true
    }

    /// Block until a message is available
    fn pop(&self) -> QueueMsg {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.items.pop_front() {
                Some(msg) => return msg,
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Remove every queued job without touching the sentinels or
    /// waiting on a parked worker
    fn drain_jobs(&self) -> Vec<Arc<Job>> {
        let mut state = self.state.lock().unwrap();
        let mut kept = VecDeque::new();
        let mut drained = Vec::new();
        while let Some(msg) = state.items.pop_front() {
            match msg {
                QueueMsg::Job(job) => drained.push(job),
                QueueMsg::Shutdown => kept.push_back(QueueMsg::Shutdown),
            }
        }
        state.items = kept;
        drained
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// A queue tier with `worker_count` consumer threads. Jobs are handed
/// to `handler` in FIFO order with respect to this tier only.
pub struct Tier {
    label: String,
    worker_count: usize,
    channel: Arc<Channel>,
    inflight: Arc<Inflight>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Tier {
    pub fn new<F>(label: &str, worker_count: usize, handler: F) -> Self
    where
        F: Fn(Arc<Job>) + Send + Sync + 'static,
    {
        let worker_count = worker_count.max(1);
        let channel = Arc::new(Channel::default());
        let inflight = Arc::new(Inflight::default());
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let channel = channel.clone();
            let inflight = inflight.clone();
            let handler = handler.clone();
            let label = label.to_string();
            workers.push(thread::spawn(move || {
                loop {
                    match channel.pop() {
                        QueueMsg::Job(job) => {
                            handler(job);
                            inflight.dec();
                        }
                        QueueMsg::Shutdown => {
                            debug!(tier = %label, worker = worker_id, "worker exiting");
                            break;
                        }
                    }
                }
            }));
        }

        Self {
            label: label.to_string(),
            worker_count,
            channel,
            inflight,
            workers: Mutex::new(workers),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn submit(&self, job: Arc<Job>) {
        self.inflight.inc();
        // The push only fails after shutdown, when the job is moot
        if !self.channel.push(QueueMsg::Job(job)) {
            self.inflight.dec();
        }
    }

    /// Jobs queued or being handled right now
    pub fn inflight_count(&self) -> usize {
        *self.inflight.count.lock().unwrap()
    }

    /// True when nothing is queued and no worker is mid-job
    pub fn is_drained(&self) -> bool {
        self.inflight.is_zero()
    }

    /// Block until the tier has no queued or running work
    pub fn wait_drained(&self) {
        self.inflight.wait_zero();
    }

    /// Pull everything still queued off the channel and return it so
    /// the caller can account for the unstarted jobs (running jobs
    /// keep going)
    pub fn discard_pending(&self) -> Vec<Arc<Job>> {
        let discarded = self.channel.drain_jobs();
        for _ in &discarded {
            self.inflight.dec();
        }
        discarded
    }

    /// Empty the queue, post one sentinel per worker, and join them
    pub fn shutdown(&self) {
        let _ = self.discard_pending();
        for _ in 0..self.worker_count {
            let _ = self.channel.push(QueueMsg::Shutdown);
        }
        self.channel.close();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}
