use std::collections::VecDeque;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel as channel;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::index::{self, DirSummary, IndexCache};
use crate::types::Category;

use super::roots::{RootSpec, ScanMode};

pub type ProgressFn = dyn Fn(f32, &str) + Send + Sync;

/// A filesystem entry surfaced by the walk, before scoring.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub path: PathBuf,
    pub category: Category,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub mtime_ns: i64,
    pub inode: u64,
    /// Replayed from the index cache instead of read from disk.
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
}

impl WalkerConfig {
    pub fn new(workers: usize, include_hidden: bool, follow_symlinks: bool) -> Self {
        WalkerConfig {
            workers: workers.max(1),
            queue_capacity: 1024,
            include_hidden,
            follow_symlinks,
        }
    }
}

struct WorkItem {
    dir: PathBuf,
    spec: usize,
    depth: usize,
    device: u64,
}

/// What a worker reports back to the dispatcher after each directory.
enum Feedback {
    Discovered(WorkItem),
    Done,
}

/// Shared state for one walk; cheap to clone per worker.
struct WalkContext<'a> {
    specs: &'a [RootSpec],
    config: &'a WalkerConfig,
    index: Option<&'a IndexCache>,
    cancel: &'a CancellationToken,
    seen_inodes: &'a DashMap<(u64, u64), ()>,
    results: channel::Sender<RawEntry>,
}

impl Clone for WalkContext<'_> {
    fn clone(&self) -> Self {
        WalkContext {
            specs: self.specs,
            config: self.config,
            index: self.index,
            cancel: self.cancel,
            seen_inodes: self.seen_inodes,
            results: self.results.clone(),
        }
    }
}

/// Breadth-first parallel walk over the discovery roots.
///
/// A single dispatcher owns the frontier and is the only producer on the
/// bounded work queue: its `send` blocks while the queue is full, so a busy
/// pool pauses enumeration instead of piling up directories. Workers report
/// discovered subdirectories back on an unbounded channel and never block,
/// which keeps the dispatcher's blocking send deadlock-free. Cancellation is
/// honored between directories and returns whatever was collected so far.
pub fn walk(
    specs: &[RootSpec],
    config: &WalkerConfig,
    index: Option<&IndexCache>,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
) -> Vec<RawEntry> {
    let (work_tx, work_rx) = channel::bounded::<WorkItem>(config.queue_capacity);
    let (found_tx, found_rx) = channel::unbounded::<Feedback>();
    let (result_tx, result_rx) = channel::unbounded::<RawEntry>();
    let seen_inodes: DashMap<(u64, u64), ()> = DashMap::new();

    let mut frontier: VecDeque<WorkItem> = VecDeque::new();
    for (idx, spec) in specs.iter().enumerate() {
        let Ok(metadata) = fs::symlink_metadata(&spec.root) else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        frontier.push_back(WorkItem {
            dir: spec.root.clone(),
            spec: idx,
            depth: 0,
            device: device_of(&metadata),
        });
    }

    let ctx = WalkContext {
        specs,
        config,
        index,
        cancel,
        seen_inodes: &seen_inodes,
        results: result_tx,
    };

    std::thread::scope(|scope| {
        for _ in 0..config.workers {
            let ctx = ctx.clone();
            let work_rx = work_rx.clone();
            let found_tx = found_tx.clone();
            scope.spawn(move || {
                while let Ok(item) = work_rx.recv() {
                    let discovered =
                        ctx.process_directory(&item.dir, item.spec, item.depth, item.device);
                    for child in discovered {
                        let _ = found_tx.send(Feedback::Discovered(child));
                    }
                    let _ = found_tx.send(Feedback::Done);
                }
            });
        }
        drop(found_tx);

        // Dispatcher loop. Invariant: `outstanding` counts directories
        // handed to the queue whose Done has not come back yet; the walk is
        // over when the frontier is empty and nothing is outstanding.
        let mut outstanding = 0usize;
        let mut processed = 0usize;
        loop {
            while let Ok(feedback) = found_rx.try_recv() {
                match feedback {
                    Feedback::Discovered(item) => frontier.push_back(item),
                    Feedback::Done => {
                        outstanding -= 1;
                        processed += 1;
                        tick_progress(progress, processed, outstanding, frontier.len());
                    }
                }
            }
            if cancel.is_cancelled() {
                // stop accepting new directories; drain what is in flight
                frontier.clear();
            }

            if let Some(item) = frontier.pop_front() {
                // The producer-side backpressure: blocks while the queue is
                // at capacity.
                if work_tx.send(item).is_err() {
                    break;
                }
                outstanding += 1;
            } else if outstanding > 0 {
                match found_rx.recv_timeout(Duration::from_millis(25)) {
                    Ok(Feedback::Discovered(item)) => frontier.push_back(item),
                    Ok(Feedback::Done) => {
                        outstanding -= 1;
                        processed += 1;
                        tick_progress(progress, processed, outstanding, frontier.len());
                    }
                    Err(channel::RecvTimeoutError::Timeout) => {}
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                }
            } else {
                break;
            }
        }
        drop(work_tx);
    });
    drop(ctx);

    if let Some(cb) = progress {
        cb(1.0, "scan complete");
    }
    result_rx.try_iter().collect()
}

fn tick_progress(
    progress: Option<&ProgressFn>,
    processed: usize,
    outstanding: usize,
    queued: usize,
) {
    if processed % 16 != 0 {
        return;
    }
    if let Some(cb) = progress {
        let total = processed + outstanding + queued;
        let fraction = processed as f32 / total.max(1) as f32;
        cb(fraction, "scanning");
    }
}

impl WalkContext<'_> {
    /// Enumerate one directory, emitting file entries and returning the
    /// subdirectories the dispatcher should queue next.
    fn process_directory(
        &self,
        dir: &Path,
        spec_idx: usize,
        depth: usize,
        device: u64,
    ) -> Vec<WorkItem> {
        let mut discovered = Vec::new();
        if self.cancel.is_cancelled() {
            return discovered;
        }
        let spec = &self.specs[spec_idx];

        // Replay an unchanged directory from the index instead of reading
        // it: cached direct files are emitted as-is and recorded subdirs go
        // back on the queue for their own staleness checks. Dir-name
        // matching needs the real tree, so it never uses the cache.
        let use_index = !matches!(spec.mode, ScanMode::MatchDirNames(_));
        if use_index {
            if let Some(index) = self.index {
                if let Ok(metadata) = fs::symlink_metadata(dir) {
                    if let Some(summary) = index.summary(dir) {
                        if summary.dir_mtime_ns == index::mtime_ns(&metadata) {
                            for (path, entry) in index.files_under(dir) {
                                let _ = self.results.send(RawEntry {
                                    path,
                                    category: spec.category,
                                    size: entry.size,
                                    modified: ns_to_system_time(entry.mtime_ns),
                                    accessed: None,
                                    mtime_ns: entry.mtime_ns,
                                    inode: entry.inode,
                                    from_cache: true,
                                });
                            }
                            if depth + 1 <= spec.max_depth {
                                for name in &summary.subdirs {
                                    discovered.push(WorkItem {
                                        dir: dir.join(name),
                                        spec: spec_idx,
                                        depth: depth + 1,
                                        device,
                                    });
                                }
                            }
                            return discovered;
                        }
                        index.invalidate_dir(dir);
                    }
                }
            }
        }

        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(err) => {
                if err.kind() == std::io::ErrorKind::PermissionDenied {
                    log::warn!("permission denied, skipping subtree: {}", dir.display());
                } else {
                    log::debug!("unreadable directory {}: {err}", dir.display());
                }
                return discovered;
            }
        };

        let include_hidden = spec.include_hidden || self.config.include_hidden;
        let mut direct_count = 0usize;
        let mut direct_size = 0u64;
        let mut subdirs: Vec<String> = Vec::new();

        for entry in reader.flatten() {
            if self.cancel.is_cancelled() {
                return discovered;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !include_hidden && name.starts_with('.') {
                continue;
            }

            let Ok(mut metadata) = entry.metadata() else {
                continue;
            };
            if metadata.file_type().is_symlink() {
                if !self.config.follow_symlinks {
                    continue;
                }
                // Follow only regular files whose target stays inside the
                // root; a link pointing elsewhere is never a candidate.
                let Ok(resolved) = entry.path().canonicalize() else {
                    continue;
                };
                if !resolved.starts_with(&spec.root) {
                    continue;
                }
                match fs::metadata(entry.path()) {
                    Ok(followed) if followed.is_file() => metadata = followed,
                    _ => continue,
                }
            }

            let path = entry.path();
            let ids = inode_ids(&metadata);

            if metadata.is_dir() {
                if ids.0 != device {
                    continue;
                }
                if self.seen_inodes.insert(ids, ()).is_some() {
                    continue;
                }
                if let ScanMode::MatchDirNames(names) = &spec.mode {
                    if names.iter().any(|candidate| candidate.as_str() == name) {
                        let size = directory_size(&path);
                        let _ = self.results.send(RawEntry {
                            path,
                            category: spec.category,
                            size,
                            modified: metadata.modified().ok(),
                            accessed: metadata.accessed().ok(),
                            mtime_ns: index::mtime_ns(&metadata),
                            inode: ids.1,
                            from_cache: false,
                        });
                        continue;
                    }
                }
                if depth + 1 <= spec.max_depth {
                    subdirs.push(name.into_owned());
                    discovered.push(WorkItem {
                        dir: path,
                        spec: spec_idx,
                        depth: depth + 1,
                        device,
                    });
                }
            } else if metadata.is_file() {
                if matches!(spec.mode, ScanMode::MatchDirNames(_)) {
                    continue;
                }
                if metadata.len() < spec.min_size {
                    continue;
                }
                if self.seen_inodes.insert(ids, ()).is_some() {
                    continue;
                }

                direct_count += 1;
                direct_size += metadata.len();
                if let Some(index) = self.index {
                    let mtime = index::mtime_ns(&metadata);
                    // A still-valid fingerprint survives the rewrite.
                    let fingerprint = index.fingerprint(&path, metadata.len(), mtime);
                    index.record_file(&path, metadata.len(), mtime, ids.1, "", fingerprint);
                }
                let _ = self.results.send(RawEntry {
                    path,
                    category: spec.category,
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                    accessed: metadata.accessed().ok(),
                    mtime_ns: index::mtime_ns(&metadata),
                    inode: ids.1,
                    from_cache: false,
                });
            }
        }

        if use_index {
            if let Some(index) = self.index {
                if let Ok(metadata) = fs::symlink_metadata(dir) {
                    index.record_summary(
                        dir,
                        DirSummary {
                            count: direct_count,
                            total_size: direct_size,
                            dir_mtime_ns: index::mtime_ns(&metadata),
                            subdirs,
                        },
                    );
                }
            }
        }

        discovered
    }
}

/// Recursive size of a directory tree, following no symlinks.
pub fn directory_size(path: &Path) -> u64 {
    let mut total = 0u64;
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                total += metadata.len();
            }
        }
    }
    total
}

#[cfg(unix)]
fn inode_ids(metadata: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn inode_ids(_metadata: &Metadata) -> (u64, u64) {
    (0, 0)
}

#[cfg(unix)]
fn device_of(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.dev()
}

#[cfg(not(unix))]
fn device_of(_metadata: &Metadata) -> u64 {
    0
}

fn ns_to_system_time(ns: i64) -> Option<SystemTime> {
    if ns <= 0 {
        return None;
    }
    UNIX_EPOCH.checked_add(Duration::from_nanos(ns as u64))
}
