// Watch folders: poll a directory and deliver each video file exactly
// once, after its size has held still across consecutive polls

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::folder::scan;

/// What the poll thread sends down the delivery channel
pub enum WatchEvent {
    /// A file whose size held still across two consecutive polls
    Ready(PathBuf),
    /// The watch was unregistered; no more events follow
    Closed,
}

/// Per-file observation state carried between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    /// Seen with this size; not yet stable
    Sizing(u64),
    /// Already delivered; ignore until the file disappears
    Delivered,
}

/// Pure single-poll step over the tracking table. `sizes` is what this
/// poll observed on disk. Returns the files that just became stable.
/// Files that vanished are pruned so a re-created file is picked up
/// fresh.
pub fn poll_step(
    tracked: &mut HashMap<PathBuf, FileStateEntry>,
    sizes: &HashMap<PathBuf, u64>,
) -> Vec<PathBuf> {
    let mut ready = Vec::new();

    tracked.retain(|path, _| sizes.contains_key(path));

    for (path, &size) in sizes {
        match tracked.get(path).map(|e| e.state) {
            None => {
                tracked.insert(
                    path.clone(),
                    FileStateEntry {
                        state: FileState::Sizing(size),
                    },
                );
            }
            Some(FileState::Sizing(previous)) if previous == size => {
                tracked.get_mut(path).unwrap().state = FileState::Delivered;
                ready.push(path.clone());
            }
            Some(FileState::Sizing(_)) => {
                tracked.get_mut(path).unwrap().state = FileState::Sizing(size);
            }
            Some(FileState::Delivered) => {}
        }
    }

    ready.sort();
    ready
}

#[derive(Debug, Clone, Copy)]
pub struct FileStateEntry {
    state: FileState,
}

/// One registered watch folder with its poll thread
pub struct WatchFolderInstance {
    pub folder: PathBuf,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatchFolderInstance {
    /// Start polling `folder` every `poll_interval`, sending stable
    /// files to `events`. Delivery stops and `Closed` is sent when the
    /// instance is unregistered.
    pub fn start(
        folder: PathBuf,
        recursive: bool,
        poll_interval: Duration,
        events: Sender<WatchEvent>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_folder = folder.clone();

        let handle = thread::spawn(move || {
            info!(folder = %thread_folder.display(), "watch folder started");
            let mut tracked: HashMap<PathBuf, FileStateEntry> = HashMap::new();

            while thread_running.load(Ordering::SeqCst) {
                match observe_sizes(&thread_folder, recursive) {
                    Ok(sizes) => {
                        for path in poll_step(&mut tracked, &sizes) {
                            debug!(file = %path.display(), "watch file stable");
                            if events.send(WatchEvent::Ready(path)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(folder = %thread_folder.display(), "watch poll failed: {e:#}");
                    }
                }

                // Sleep in short slices so unregister takes effect fast
                let mut remaining = poll_interval;
                let slice = Duration::from_millis(100);
                while remaining > Duration::ZERO && thread_running.load(Ordering::SeqCst) {
                    let step = remaining.min(slice);
                    thread::sleep(step);
                    remaining -= step;
                }
            }

            let _ = events.send(WatchEvent::Closed);
            info!(folder = %thread_folder.display(), "watch folder stopped");
        });

        Self {
            folder,
            running,
            handle: Some(handle),
        }
    }

    /// Stop polling and join the thread. `Closed` is the last event
    /// the channel sees.
    pub fn unregister(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchFolderInstance {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Snapshot the sizes of every video file currently under `folder`
fn observe_sizes(folder: &Path, recursive: bool) -> Result<HashMap<PathBuf, u64>> {
    let mut sizes = HashMap::new();
    for path in scan(folder, recursive)? {
        match std::fs::metadata(&path) {
            Ok(meta) => {
                sizes.insert(path, meta.len());
            }
            // File vanished between listing and stat; next poll settles it
            Err(_) => continue,
        }
    }
    Ok(sizes)
}
