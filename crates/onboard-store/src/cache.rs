use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Entries older than this are misses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const ENTRY_EXTENSION: &str = "yaml";

/// `$XDG_CACHE_HOME/onboard/manifests`, falling back to `~/.cache/onboard/manifests`.
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("onboard").join("manifests"));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".cache/onboard/manifests"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub files: usize,
    pub total_size: u64,
}

/// A cache entry read regardless of freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedManifest {
    pub content: String,
    pub age: Duration,
}

/// Manifest content cache keyed by `(owner, repo)`.
///
/// One file per entry at `<dir>/<owner>/<repo>.yaml`, with a leading `.` or
/// `_` escaped as `_`; entry age is the file's modification time. Writes are atomic via `NamedTempFile`, so a reader sees
/// either the previous content or the new content, never a partial write.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ManifestCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_path(&self, owner: &str, repo: &str) -> Result<PathBuf, StoreError> {
        match (encode_key_part(owner), encode_key_part(repo)) {
            (Some(owner_dir), Some(file_stem)) => Ok(self
                .dir
                .join(owner_dir)
                .join(format!("{file_stem}.{ENTRY_EXTENSION}"))),
            _ => Err(StoreError::InvalidCacheKey(format!("{owner}/{repo}"))),
        }
    }

    pub fn write(&self, owner: &str, repo: &str, content: &str) -> Result<(), StoreError> {
        let dest = self.entry_path(owner, repo)?;
        let parent = dest
            .parent()
            .map_or_else(|| self.dir.clone(), Path::to_path_buf);
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&parent)?;

        debug!("cached manifest for {owner}/{repo} ({} bytes)", content.len());
        Ok(())
    }

    /// Fresh content for `(owner, repo)`, or `None` on a miss. Never fails:
    /// unreadable entries are logged and treated as misses.
    pub fn read(&self, owner: &str, repo: &str) -> Option<String> {
        let entry = self.read_any_age(owner, repo)?;
        if entry.age < self.ttl {
            Some(entry.content)
        } else {
            debug!(
                "cache entry for {owner}/{repo} expired ({}s old)",
                entry.age.as_secs()
            );
            None
        }
    }

    /// Content for `(owner, repo)` regardless of age.
    pub fn read_any_age(&self, owner: &str, repo: &str) -> Option<CachedManifest> {
        let path = self.entry_path(owner, repo).ok()?;
        if !path.exists() {
            return None;
        }
        let age = match entry_age(&path) {
            Ok(age) => age,
            Err(e) => {
                warn!("cannot stat cache entry {}: {e}", path.display());
                return None;
            }
        };
        match fs::read_to_string(&path) {
            Ok(content) => Some(CachedManifest { content, age }),
            Err(e) => {
                warn!("cannot read cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Remove the entry regardless of age. Returns whether anything was removed.
    pub fn clear(&self, owner: &str, repo: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(owner, repo)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry. Returns the number of entries removed.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let removed = self.entries()?.len();
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        let mut stats = CacheStats::default();
        for path in self.entries()? {
            stats.files += 1;
            stats.total_size += fs::metadata(&path)?.len();
        }
        Ok(stats)
    }

    fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }
        for owner in fs::read_dir(&self.dir)? {
            let owner = owner?;
            if !owner.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(owner.path())? {
                let path = entry?.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
                if !hidden && path.extension().is_some_and(|e| e == ENTRY_EXTENSION) {
                    entries.push(path);
                }
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// Map one key component to a file name. A leading `.` or `_` is escaped
/// with `_`, so names like `.github` stay visible and distinct from
/// `_github`. Components that cannot be a single path segment are rejected.
fn encode_key_part(part: &str) -> Option<String> {
    if part.is_empty() || part.contains(['/', '\\', '\0']) {
        return None;
    }
    if part.starts_with(['.', '_']) {
        Some(format!("_{part}"))
    } else {
        Some(part.to_owned())
    }
}

fn entry_age(path: &Path) -> Result<Duration, std::io::Error> {
    let modified = fs::metadata(path)?.modified()?;
    // A modification time in the future counts as brand new.
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}
