// Dispatcher: routes submitted jobs onto scheduling tiers and owns the
// worker pools, the running-job table, and the watch-folder consumers

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chunk::{self, ChunkTracker};
use super::fairness::FairnessRing;
use super::folder::FolderExpansion;
use super::job::{CodecFamily, Job, JobKind, Outcome, StatusSink};
use super::nvenc::{needs_admission, NvencProber};
use super::queue::Tier;
use super::runner::Runner;
use super::watch::{WatchEvent, WatchFolderInstance};
use crate::config::Config;

/// Which tier a worker belongs to; decides the gates it passes before
/// running a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierKind {
    Standard,
    Parallel,
    Nvenc,
    Codec(CodecFamily),
}

pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    runner: Runner,
    prober: Arc<NvencProber>,
    sink: Arc<dyn StatusSink>,
    fairness: FairnessRing,

    /// Always present; single worker, strict FIFO
    standard: Tier,
    /// Shared pool when parallelism is on and per-codec is off
    parallel: Option<Tier>,
    /// One tier per codec family in per-codec mode
    codec_tiers: HashMap<CodecFamily, Tier>,
    /// Created on first NVENC submission so discovery probing only
    /// runs when the feature is actually exercised
    nvenc: Mutex<Option<Arc<Tier>>>,

    /// Jobs submitted and not yet terminal, chunk sub-jobs excluded
    running: Mutex<Vec<Arc<Job>>>,
    /// Per-parent sinks for in-flight chunk sets
    chunk_sinks: Mutex<HashMap<Uuid, Arc<ChunkTracker>>>,
    /// Registered watch folders, keyed by folder path
    watches: Mutex<HashMap<PathBuf, WatchRegistration>>,
    /// Serializes watch-folder arrivals when concurrent watch encodes
    /// are disabled
    watch_gate: Mutex<()>,

    self_ref: Weak<Inner>,
}

struct WatchRegistration {
    job: Arc<Job>,
    instance: WatchFolderInstance,
    consumer: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(config: Config, prober: Arc<NvencProber>, sink: Arc<dyn StatusSink>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let standard = Tier::new("standard", 1, handler(weak.clone(), TierKind::Standard));

            let p = &config.parallelism;
            let parallel = (p.enabled && !p.per_codec).then(|| {
                Tier::new(
                    "parallel",
                    p.workers.max(1) as usize,
                    handler(weak.clone(), TierKind::Parallel),
                )
            });

            let mut codec_tiers = HashMap::new();
            if p.enabled && p.per_codec {
                for &codec in CodecFamily::ALL {
                    codec_tiers.insert(
                        codec,
                        Tier::new(
                            codec.display_name(),
                            p.workers_for(codec) as usize,
                            handler(weak.clone(), TierKind::Codec(codec)),
                        ),
                    );
                }
            }

            Inner {
                runner: Runner::new(config.engine.clone()),
                config,
                prober,
                sink,
                fairness: FairnessRing::new(),
                standard,
                parallel,
                codec_tiers,
                nvenc: Mutex::new(None),
                running: Mutex::new(Vec::new()),
                chunk_sinks: Mutex::new(HashMap::new()),
                watches: Mutex::new(HashMap::new()),
                watch_gate: Mutex::new(()),
                self_ref: weak.clone(),
            }
        });

        Self { inner }
    }

    /// Submit one job. Encode jobs are queued; folder jobs expand on a
    /// separate thread; watch-folder jobs register a poller and return
    /// immediately.
    pub fn submit(&self, job: Arc<Job>) {
        match job.kind {
            JobKind::Encode => self.inner.submit_encode(job),
            JobKind::Folder => self.inner.submit_folder(job),
            JobKind::WatchFolder => self.inner.register_watch(job),
        }
    }

    /// Snapshot of all non-terminal jobs in submission order
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.inner.running.lock().unwrap().clone()
    }

    pub fn pause(&self, id: Uuid) -> bool {
        self.inner.with_job(id, |job| job.control().pause())
    }

    pub fn resume(&self, id: Uuid) -> bool {
        self.inner.with_job(id, |job| job.control().resume())
    }

    pub fn stop(&self, id: Uuid) -> bool {
        self.inner.with_job(id, |job| job.control().stop())
    }

    /// Stop a registered watch folder. Pending arrivals already queued
    /// keep running.
    pub fn unregister_watch(&self, folder: &std::path::Path) -> bool {
        let registration = self.inner.watches.lock().unwrap().remove(folder);
        match registration {
            Some(mut reg) => {
                reg.instance.unregister();
                if let Some(consumer) = reg.consumer.take() {
                    let _ = consumer.join();
                }
                // The watch's parent job leaves the running table only
                // now that the watch is cancelled
                reg.job.mark_terminal(Outcome::Stopped, None);
                self.inner.sink.on_terminal(&reg.job, Outcome::Stopped);
                self.inner.remove_running(&reg.job);
                true
            }
            None => false,
        }
    }

    /// Block until every queue is empty and every submitted job has
    /// reached a terminal state. Registered watch folders are resident
    /// by design and do not count as pending work.
    pub fn wait_idle(&self) {
        self.inner.wait_all_drained();
        loop {
            let busy = self
                .inner
                .running
                .lock()
                .unwrap()
                .iter()
                .any(|job| job.kind != JobKind::WatchFolder);
            if !busy {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Tear everything down: stop watch folders, discard queued work,
    /// stop running jobs, and join every worker
    pub fn shutdown(&self) {
        info!("dispatcher shutting down");

        let watch_list: Vec<PathBuf> = self.inner.watches.lock().unwrap().keys().cloned().collect();
        for folder in watch_list {
            self.unregister_watch(&folder);
        }

        // Queued-but-unstarted work is discarded with a Stopped
        // terminal so nothing waiting on these jobs hangs; running
        // jobs get a stop, which also frees any worker blocked in a
        // pause wait
        let mut discarded = self.inner.standard.discard_pending();
        if let Some(tier) = &self.inner.parallel {
            discarded.extend(tier.discard_pending());
        }
        for tier in self.inner.codec_tiers.values() {
            discarded.extend(tier.discard_pending());
        }
        if let Some(tier) = self.inner.nvenc.lock().unwrap().as_ref() {
            discarded.extend(tier.discard_pending());
        }
        for job in discarded {
            let sink = self.inner.sink_for(&job);
            self.inner.finish_without_run(&job, sink.as_ref());
        }

        for job in self.inner.running.lock().unwrap().iter() {
            job.control().stop();
        }

        self.inner.standard.shutdown();
        if let Some(tier) = &self.inner.parallel {
            tier.shutdown();
        }
        for tier in self.inner.codec_tiers.values() {
            tier.shutdown();
        }
        let nvenc = self.inner.nvenc.lock().unwrap().take();
        if let Some(tier) = nvenc {
            tier.shutdown();
        }
    }
}

fn handler(weak: Weak<Inner>, kind: TierKind) -> impl Fn(Arc<Job>) + Send + Sync + 'static {
    move |job| {
        if let Some(inner) = weak.upgrade() {
            inner.handle_encode(kind, job);
        }
    }
}

impl Inner {
    fn submit_encode(self: &Arc<Self>, job: Arc<Job>) {
        self.running.lock().unwrap().push(job.clone());

        if self.config.parallelism.enabled {
            let chunk_count = self.chunk_count_for(job.params.codec);
            if chunk::is_eligible(&job.params, job.duration_s, chunk_count) {
                return self.spawn_chunked(job, chunk_count);
            }
        }
        self.route_encode(job);
    }

    /// Chunk fan-out mirrors the pool that will consume the chunks:
    /// the codec's configured parallelism, or the NVENC session
    /// ceiling for hardware encodes
    fn chunk_count_for(&self, codec: CodecFamily) -> u32 {
        let p = &self.config.parallelism;
        if codec.is_nvenc() {
            if p.nvenc_workers > 0 {
                p.nvenc_workers
            } else {
                self.prober.max_sessions().max(1)
            }
        } else if p.per_codec {
            p.workers_for(codec)
        } else {
            p.workers.max(1)
        }
    }

    /// Pick the tier this job queues on. Per-codec mode takes
    /// precedence over the dedicated NVENC pool, so hardware encodes
    /// line up in their codec's queue and take fairness turns like
    /// everyone else. Chunk sub-jobs come through here too and ride
    /// the same rules as their codec.
    fn route_encode(self: &Arc<Self>, job: Arc<Job>) {
        let codec = job.params.codec;
        let p = &self.config.parallelism;

        if p.enabled && p.per_codec {
            self.fairness.arrived(codec);
            match self.codec_tiers.get(&codec) {
                Some(tier) => tier.submit(job),
                None => self.standard.submit(job),
            }
        } else if p.enabled && p.concurrent_nvenc && codec.is_nvenc() {
            self.nvenc_tier().submit(job);
        } else if let Some(tier) = &self.parallel {
            tier.submit(job);
        } else {
            self.standard.submit(job);
        }
    }

    /// The NVENC tier is sized at first use: a configured worker count
    /// is taken as-is, zero means discover the session ceiling
    fn nvenc_tier(self: &Arc<Self>) -> Arc<Tier> {
        let mut slot = self.nvenc.lock().unwrap();
        if let Some(tier) = slot.as_ref() {
            return tier.clone();
        }

        let configured = self.config.parallelism.nvenc_workers;
        let workers = if configured > 0 {
            configured
        } else {
            self.prober.max_sessions().max(1)
        };
        debug!(workers, "creating NVENC tier");
        let tier = Arc::new(Tier::new(
            "nvenc",
            workers as usize,
            handler(self.self_ref.clone(), TierKind::Nvenc),
        ));
        *slot = Some(tier.clone());
        tier
    }

    /// Worker body shared by every tier
    fn handle_encode(self: &Arc<Self>, kind: TierKind, job: Arc<Job>) {
        let sink = self.sink_for(&job);

        if job.control().is_stopped() {
            self.finish_without_run(&job, sink.as_ref());
            self.after_encode(kind);
            return;
        }

        // Per-codec tiers take turns: wait until this codec holds the
        // ring head, unless the job is stopped while waiting. The
        // idle-head check lets the ring recover when a codec's last
        // two jobs finish simultaneously and the drained signal from
        // after_encode is lost to the race.
        if let TierKind::Codec(codec) = kind {
            self.fairness.wait_until_current(
                codec,
                || job.control().is_stopped(),
                |head| {
                    self.codec_tiers
                        .get(&head)
                        .map(|tier| tier.is_drained())
                        .unwrap_or(true)
                },
            );
            if job.control().is_stopped() {
                self.finish_without_run(&job, sink.as_ref());
                self.after_encode(kind);
                return;
            }
        }

        // Hardware session admission: hold the worker until the GPU
        // can actually take another encode
        if needs_admission(job.params.codec) {
            if !self.prober.params_supported(&job.params) {
                // Advisory only; the driver may still cope with real input
                let msg = "NVENC rejected these parameters in a dry run, attempting anyway";
                warn!(job = %job.id, "{msg}");
                job.note_advisory(msg);
                sink.on_advisory(&job, msg);
            }
            if !self.prober.wait_for_session(job.control()) {
                self.finish_without_run(&job, sink.as_ref());
                self.after_encode(kind);
                return;
            }
        }

        let outcome = self.runner.run(&job, sink.as_ref());
        debug!(job = %job.id, ?outcome, "job finished");
        self.remove_running(&job);
        self.after_encode(kind);
    }

    /// Terminal bookkeeping for a job that never reached the runner
    fn finish_without_run(&self, job: &Job, sink: &dyn StatusSink) {
        job.mark_terminal(Outcome::Stopped, None);
        sink.on_terminal(job, Outcome::Stopped);
        self.remove_running(job);
    }

    fn after_encode(&self, kind: TierKind) {
        if let TierKind::Codec(codec) = kind {
            // This worker still counts against inflight, so 1 means
            // the tier is empty once we return
            if let Some(tier) = self.codec_tiers.get(&codec) {
                if tier.inflight_count() <= 1 {
                    self.fairness.drained(codec);
                }
            }
        }
    }

    /// Chunk sub-jobs report to their parent's tracker; everything
    /// else reports to the caller's sink
    fn sink_for(&self, job: &Job) -> Arc<dyn StatusSink> {
        if let Some(parent) = job.parent() {
            if let Some(tracker) = self.chunk_sinks.lock().unwrap().get(&parent.id) {
                return tracker.clone();
            }
        }
        self.sink.clone()
    }

    fn remove_running(&self, job: &Job) {
        if job.parent().is_some() {
            return;
        }
        self.running.lock().unwrap().retain(|j| j.id != job.id);
    }

    fn with_job<F: FnOnce(&Arc<Job>)>(&self, id: Uuid, f: F) -> bool {
        let running = self.running.lock().unwrap();
        match running.iter().find(|j| j.id == id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    /// Split an eligible job into chunks, queue them, and reassemble
    /// on a dedicated thread so no tier worker is held hostage waiting
    /// for its own sub-jobs
    fn spawn_chunked(self: &Arc<Self>, parent: Arc<Job>, chunk_count: u32) {
        let inner = self.clone();
        thread::spawn(move || {
            parent.mark_started();
            let temp_dir = inner.config.defaults.temp_dir();
            let set = match chunk::build_chunk_set(&parent, chunk_count, &temp_dir) {
                Ok(set) => set,
                Err(e) => {
                    warn!(job = %parent.id, "chunk setup failed: {e:#}");
                    parent.mark_terminal(Outcome::Failed, Some(format!("{e:#}")));
                    inner.sink.on_terminal(&parent, Outcome::Failed);
                    inner.remove_running(&parent);
                    return;
                }
            };

            let mut subjobs = set.video_chunks.clone();
            subjobs.push(set.audio_job.clone());
            let tracker = Arc::new(ChunkTracker::new(
                parent.clone(),
                inner.sink.clone(),
                &subjobs,
            ));
            inner
                .chunk_sinks
                .lock()
                .unwrap()
                .insert(parent.id, tracker.clone());

            info!(job = %parent.id, chunks = set.video_chunks.len(), "chunked encode started");
            for subjob in subjobs {
                inner.route_encode(subjob);
            }

            let result = tracker.wait_all();
            inner.chunk_sinks.lock().unwrap().remove(&parent.id);

            let outcome =
                chunk::finish_chunked(inner.runner.paths(), &parent, &set, result);
            if outcome == Outcome::Finished {
                // Reassembly succeeded; the intermediates can go
                let _ = std::fs::remove_dir_all(&set.work_dir);
            }
            parent.mark_terminal(outcome, None);
            inner.sink.on_terminal(&parent, outcome);
            inner.remove_running(&parent);
        });
    }

    /// Expand a folder job into per-file encodes on its own thread.
    /// With parallel tiers enabled the expansion waits for the
    /// standard queue to drain first, so one-at-a-time work submitted
    /// earlier is not suddenly raced by a bulk import.
    fn submit_folder(self: &Arc<Self>, job: Arc<Job>) {
        self.running.lock().unwrap().push(job.clone());
        let inner = self.clone();
        thread::spawn(move || {
            job.mark_started();

            if inner.config.parallelism.enabled {
                inner.standard.wait_drained();
            }

            let expansion = FolderExpansion {
                paths: inner.runner.paths().clone(),
                output_dir: job.output_path.clone(),
                params: job.params.clone(),
                recursive: inner.config.folders.recursive,
                auto_crop: inner.config.folders.auto_crop,
            };

            match expansion.expand(&job.input_path) {
                Ok(children) => {
                    info!(folder = %job.input_path.display(), count = children.len(), "folder expanded");
                    for child in children {
                        if job.control().is_stopped() {
                            break;
                        }
                        inner.submit_encode(child);
                    }
                    job.mark_terminal(Outcome::Finished, None);
                    inner.sink.on_terminal(&job, Outcome::Finished);
                }
                Err(e) => {
                    warn!(folder = %job.input_path.display(), "folder expansion failed: {e:#}");
                    job.mark_terminal(Outcome::Failed, Some(format!("{e:#}")));
                    inner.sink.on_terminal(&job, Outcome::Failed);
                }
            }
            inner.remove_running(&job);
        });
    }

    /// Register a watch folder and start its consumer thread
    fn register_watch(self: &Arc<Self>, job: Arc<Job>) {
        let folder = job.input_path.clone();
        let mut watches = self.watches.lock().unwrap();
        if watches.contains_key(&folder) {
            warn!(folder = %folder.display(), "watch folder already registered");
            return;
        }

        let (tx, rx) = mpsc::channel::<WatchEvent>();
        let instance = WatchFolderInstance::start(
            folder.clone(),
            self.config.folders.recursive,
            Duration::from_secs(self.config.folders.poll_interval_s),
            tx,
        );

        // The watch itself shows up in the running table and stays
        // there until unregistered
        self.running.lock().unwrap().push(job.clone());
        job.mark_started();

        let inner = self.clone();
        let consumer_job = job.clone();
        let consumer = thread::spawn(move || {
            for event in rx {
                match event {
                    WatchEvent::Ready(path) => inner.on_watch_arrival(&consumer_job, path),
                    WatchEvent::Closed => break,
                }
            }
        });

        watches.insert(
            folder,
            WatchRegistration {
                job,
                instance,
                consumer: Some(consumer),
            },
        );
    }

    /// One stable file showed up in a watch folder. Optionally wait
    /// for the queues to empty, build the encode, and submit it. With
    /// concurrent watch encodes disabled the job goes through the
    /// single-worker standard tier under a shared gate, so arrivals
    /// from every watch folder run one at a time in arrival order.
    fn on_watch_arrival(self: &Arc<Self>, watch_job: &Arc<Job>, path: PathBuf) {
        if self.config.folders.wait_for_other_tasks {
            self.wait_all_drained();
        }

        let duration_s = match super::probe::probe_duration(self.runner.paths(), &path) {
            Ok(d) => d,
            Err(e) => {
                warn!(file = %path.display(), "watch arrival probe failed: {e:#}");
                return;
            }
        };

        let mut taken = std::collections::HashSet::new();
        let output = super::folder::derive_output_path(
            &path,
            &watch_job.output_path,
            &watch_job.params.container,
            &mut taken,
        );
        let child = Arc::new(
            Job::new(path, output, watch_job.params.clone()).with_duration(duration_s),
        );

        if self.config.folders.concurrent_watchfolders {
            self.submit_encode(child);
        } else {
            let _gate = self.watch_gate.lock().unwrap();
            self.running.lock().unwrap().push(child.clone());
            self.standard.submit(child);
            self.standard.wait_drained();
        }
    }

    fn wait_all_drained(&self) {
        self.standard.wait_drained();
        if let Some(tier) = &self.parallel {
            tier.wait_drained();
        }
        for tier in self.codec_tiers.values() {
            tier.wait_drained();
        }
        let nvenc = self.nvenc.lock().unwrap().clone();
        if let Some(tier) = nvenc {
            tier.wait_drained();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnginePaths;
    use crate::engine::job::{JobParams, NullSink};
    use std::path::Path;
    use std::sync::mpsc::Sender;

    fn fake_paths() -> EnginePaths {
        // Never executed by these tests; routing stops before any
        // process spawn because the inputs do not exist
        EnginePaths {
            ffmpeg: "/nonexistent/ffmpeg".into(),
            ffprobe: "/nonexistent/ffprobe".into(),
        }
    }

    fn dispatcher(config: Config) -> Dispatcher {
        let prober = Arc::new(NvencProber::with_fixed_sessions(fake_paths(), 2));
        Dispatcher::new(config, prober, Arc::new(NullSink))
    }

    /// Sink that reports every terminal transition on a channel
    struct TerminalSink(Mutex<Sender<(Uuid, Outcome)>>);

    impl StatusSink for TerminalSink {
        fn on_progress(&self, _job: &Job) {}
        fn on_terminal(&self, job: &Job, outcome: Outcome) {
            let _ = self.0.lock().unwrap().send((job.id, outcome));
        }
    }

    fn encode_job(codec: CodecFamily) -> Arc<Job> {
        Arc::new(
            Job::new(
                "/nonexistent/in.mkv".into(),
                "/nonexistent/out.mkv".into(),
                JobParams::new(codec, "mkv"),
            )
            .with_duration(60.0),
        )
    }

    #[test]
    fn test_stopped_job_never_runs() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let (tx, rx) = mpsc::channel();
        let prober = Arc::new(NvencProber::with_fixed_sessions(fake_paths(), 2));
        let d = Dispatcher::new(
            config,
            prober,
            Arc::new(TerminalSink(Mutex::new(tx))),
        );

        let job = encode_job(CodecFamily::X264);
        job.control().stop();
        d.submit(job.clone());

        let (id, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, job.id);
        assert_eq!(outcome, Outcome::Stopped);
        assert!(!job.status().failed);
        d.shutdown();
    }

    #[test]
    fn test_running_table_add_and_remove() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let d = dispatcher(config);

        let job = encode_job(CodecFamily::X264);
        job.control().stop();
        d.submit(job.clone());
        d.wait_idle();
        assert!(d.jobs().is_empty());
        d.shutdown();
    }

    #[test]
    fn test_control_by_id() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let d = dispatcher(config);

        let job = encode_job(CodecFamily::X265);
        // A submitted-but-stopped job passes through the queue; stop it
        // before submitting so the worker short-circuits
        d.inner.running.lock().unwrap().push(job.clone());

        assert!(d.pause(job.id));
        assert!(job.control().is_paused());
        assert!(d.resume(job.id));
        assert!(!job.control().is_paused());
        assert!(d.stop(job.id));
        assert!(job.control().is_stopped());

        assert!(!d.stop(Uuid::new_v4()));
        d.shutdown();
    }

    #[test]
    fn test_unregister_watch_unknown_folder() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let d = dispatcher(config);
        assert!(!d.unregister_watch(Path::new("/nonexistent/watch")));
        d.shutdown();
    }

    #[test]
    fn test_watch_registration_and_teardown() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.engine = fake_paths();
        config.folders.poll_interval_s = 1;
        let d = dispatcher(config);

        let watch = Arc::new(
            Job::new(
                temp.path().to_path_buf(),
                temp.path().join("out"),
                JobParams::new(CodecFamily::X264, "mkv"),
            )
            .with_kind(JobKind::WatchFolder),
        );
        d.submit(watch.clone());
        // Resident while the watch is live, gone once unregistered
        assert!(d.jobs().iter().any(|j| j.id == watch.id));
        assert!(d.unregister_watch(temp.path()));
        assert!(d.jobs().iter().all(|j| j.id != watch.id));
        assert!(watch.status().done);
        d.shutdown();
    }

    #[test]
    fn test_shutdown_returns_with_idle_workers() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let d = dispatcher(config);

        // No work was ever submitted; the standard worker is parked on
        // its queue and shutdown must still complete
        let (done_tx, done_rx) = mpsc::channel();
        let teardown = thread::spawn(move || {
            d.shutdown();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("shutdown must not block on idle workers");
        teardown.join().unwrap();
    }

    #[test]
    fn test_per_codec_routing_wins_over_nvenc_tier() {
        let mut config = Config::default();
        config.engine = fake_paths();
        config.parallelism.enabled = true;
        config.parallelism.per_codec = true;
        config.parallelism.concurrent_nvenc = true;
        let (tx, rx) = mpsc::channel();
        let prober = Arc::new(NvencProber::with_fixed_sessions(fake_paths(), 2));
        let d = Dispatcher::new(config, prober, Arc::new(TerminalSink(Mutex::new(tx))));

        // Short enough that chunking stays out of the picture
        let job = Arc::new(
            Job::new(
                "/nonexistent/in.mkv".into(),
                "/nonexistent/out.mkv".into(),
                JobParams::new(CodecFamily::NvencHevc, "mkv"),
            )
            .with_duration(5.0),
        );
        job.control().stop();
        d.submit(job.clone());

        let (id, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, job.id);
        // The codec queue serviced it; the dedicated NVENC pool was
        // never even built
        assert!(d.inner.nvenc.lock().unwrap().is_none());
        d.shutdown();
    }

    #[test]
    fn test_chunk_fanout_follows_codec_pool() {
        let mut config = Config::default();
        config.engine = fake_paths();
        config.parallelism.enabled = true;
        config.parallelism.workers = 3;
        config.parallelism.per_codec = true;
        config
            .parallelism
            .per_codec_workers
            .insert("x265".to_string(), 6);
        config.parallelism.nvenc_workers = 2;
        let d = dispatcher(config);

        assert_eq!(d.inner.chunk_count_for(CodecFamily::X265), 6);
        assert_eq!(d.inner.chunk_count_for(CodecFamily::X264), 3);
        assert_eq!(d.inner.chunk_count_for(CodecFamily::NvencH264), 2);
        d.shutdown();
    }

    #[test]
    fn test_shutdown_stops_queued_jobs() {
        let mut config = Config::default();
        config.engine = fake_paths();
        let d = dispatcher(config);

        // Pile several jobs behind the single standard worker; the
        // first fails fast (missing binary), the rest may still be
        // queued when shutdown lands
        for _ in 0..5 {
            d.submit(encode_job(CodecFamily::X264));
        }
        d.shutdown();
        // Workers are joined; no panic, no hang
    }
}
