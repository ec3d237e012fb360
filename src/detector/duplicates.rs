use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::types::{CleanableItem, DuplicateGroup, ItemId};

const SAMPLE_BYTES: usize = 64 * 1024;
const TAIL_SAMPLE_THRESHOLD: u64 = 1024 * 1024;

/// Content-identity grouping in three narrowing stages: exact byte length,
/// a 64 KiB head sample (plus a tail sample for files over 1 MiB), then a
/// full SHA-256. Only the final hash decides group membership; a sampled
/// match is never trusted on its own.
pub struct DuplicateDetector {
    include_zero_byte: bool,
    sample_cache: HashMap<PathBuf, (u64, String)>,
    content_cache: HashMap<PathBuf, String>,
}

struct Candidate {
    id: ItemId,
    path: PathBuf,
    modified: Option<DateTime<Utc>>,
}

impl DuplicateDetector {
    pub fn new(include_zero_byte: bool) -> Self {
        DuplicateDetector {
            include_zero_byte,
            sample_cache: HashMap::new(),
            content_cache: HashMap::new(),
        }
    }

    pub async fn find_duplicates(
        &mut self,
        items: &[CleanableItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<DuplicateGroup>> {
        let mut size_buckets: HashMap<u64, Vec<Candidate>> = HashMap::new();
        for item in items {
            if item.size == 0 && !self.include_zero_byte {
                continue;
            }
            let is_file = fs::symlink_metadata(&item.path)
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            size_buckets.entry(item.size).or_default().push(Candidate {
                id: item.id,
                path: item.path.clone(),
                modified: item.modified,
            });
        }

        let mut groups = Vec::new();
        for (size, candidates) in size_buckets {
            if candidates.len() < 2 {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // Stage 2: split the size bucket by sampled content.
            let mut sampled: HashMap<String, Vec<Candidate>> = HashMap::new();
            for candidate in candidates {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                match self.sample_hash(&candidate.path, size).await {
                    Ok(Some(hash)) => sampled.entry(hash).or_default().push(candidate),
                    Ok(None) => {}
                    Err(err) => {
                        log::debug!(
                            "skipping duplicate candidate {}: {err}",
                            candidate.path.display()
                        );
                    }
                }
            }

            // Stage 3: confirm with a full content hash.
            for (_, matches) in sampled {
                if matches.len() < 2 {
                    continue;
                }
                let mut confirmed: HashMap<String, Vec<Candidate>> = HashMap::new();
                for candidate in matches {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    match self.content_hash(&candidate.path).await {
                        Ok(hash) => confirmed.entry(hash).or_default().push(candidate),
                        Err(err) => {
                            log::debug!(
                                "unable to hash {} for duplicate detection: {err}",
                                candidate.path.display()
                            );
                        }
                    }
                }

                for (fingerprint, members) in confirmed {
                    if members.len() < 2 {
                        continue;
                    }
                    let Some(primary) = select_primary(&members) else {
                        continue;
                    };
                    let redundant =
                        members.iter().map(|c| c.id).filter(|id| *id != primary).collect();
                    groups.push(DuplicateGroup {
                        fingerprint,
                        size,
                        primary,
                        redundant,
                        wasted_bytes: (members.len() as u64 - 1) * size,
                    });
                }
            }

            task::yield_now().await;
        }

        Ok(groups)
    }

    /// Known full-content fingerprints computed so far, for index reuse.
    pub fn known_fingerprints(&self) -> impl Iterator<Item = (&PathBuf, &String)> {
        self.content_cache.iter()
    }

    /// Seed the content cache with a fingerprint recovered from the index.
    pub fn preload_fingerprint(&mut self, path: &Path, fingerprint: String) {
        self.content_cache.insert(path.to_path_buf(), fingerprint);
    }

    async fn sample_hash(&mut self, path: &Path, size: u64) -> Result<Option<String>> {
        if size == 0 {
            return Ok(Some("empty".to_string()));
        }
        if let Some((cached_size, hash)) = self.sample_cache.get(path) {
            if *cached_size == size {
                return Ok(Some(hash.clone()));
            }
        }

        let path_owned = path.to_path_buf();
        let hash = task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut file = fs::File::open(&path_owned)?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; SAMPLE_BYTES];

            let read = file.read(&mut buffer)?;
            if read == 0 {
                return Ok(None);
            }
            hasher.update(&buffer[..read]);

            if size > TAIL_SAMPLE_THRESHOLD {
                let offset = size.saturating_sub(SAMPLE_BYTES as u64);
                file.seek(SeekFrom::Start(offset))?;
                let read = file.read(&mut buffer)?;
                if read > 0 {
                    hasher.update(&buffer[..read]);
                }
            }

            Ok(Some(format!("{:x}", hasher.finalize())))
        })
        .await
        .map_err(|e| EngineError::Integrity(format!("hashing task failed: {e}")))?
        .map_err(|e| EngineError::io(path, e))?;

        if let Some(ref hash) = hash {
            self.sample_cache
                .insert(path.to_path_buf(), (size, hash.clone()));
        }
        Ok(hash)
    }

    pub async fn content_hash(&mut self, path: &Path) -> Result<String> {
        if let Some(hash) = self.content_cache.get(path) {
            return Ok(hash.clone());
        }

        let path_owned = path.to_path_buf();
        let hash = task::spawn_blocking(move || hash_file(&path_owned))
            .await
            .map_err(|e| EngineError::Integrity(format!("hashing task failed: {e}")))?
            .map_err(|e| EngineError::io(path, e))?;

        self.content_cache.insert(path.to_path_buf(), hash.clone());
        Ok(hash)
    }
}

/// Streaming SHA-256 over the whole file.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; SAMPLE_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// The member to keep: shortest directory depth, then oldest modification
/// time, then lexically smallest path.
fn select_primary(members: &[Candidate]) -> Option<ItemId> {
    members
        .iter()
        .min_by(|a, b| {
            let depth_a = a.path.components().count();
            let depth_b = b.path.components().count();
            depth_a
                .cmp(&depth_b)
                .then_with(|| cmp_modified(a.modified, b.modified))
                .then_with(|| a.path.cmp(&b.path))
        })
        .map(|c| c.id)
}

fn cmp_modified(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
