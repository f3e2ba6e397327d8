use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use tracing::debug;

pub const EMPTY_BLOB_SHA1: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

const HEADROOM_BYTES: u64 = 1024 * 1024;
const STATM_PAGE_BYTES: u64 = 4096;

/// Object id git assigns to a blob with this content.
pub fn git_blob_sha1_hex(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobHash {
    Digest(String),
    /// Hashing would have exceeded the memory ceiling.
    Skipped,
}

impl BlobHash {
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Digest(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

pub trait MemoryProbe: Send + Sync {
    fn current_usage(&self) -> u64;
}

/// Resident set size of the current process, or zero where it cannot be read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage(&self) -> u64 {
        fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|raw| {
                raw.split_whitespace()
                    .nth(1)
                    .and_then(|pages| pages.parse::<u64>().ok())
            })
            .map(|pages| pages * STATM_PAGE_BYTES)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn current_usage(&self) -> u64 {
        self.0
    }
}

pub struct ContentHasher {
    ceiling: Option<u64>,
    probe: Box<dyn MemoryProbe>,
}

impl ContentHasher {
    pub fn new(ceiling: Option<u64>) -> Self {
        Self::with_probe(ceiling, Box::new(ProcessMemoryProbe))
    }

    pub fn with_probe(ceiling: Option<u64>, probe: Box<dyn MemoryProbe>) -> Self {
        Self { ceiling, probe }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    pub fn hash_file(&self, path: &Path) -> Result<BlobHash> {
        let size = fs::metadata(path)
            .with_context(|| format!("failed reading metadata for {}", path.display()))?
            .len();
        if size == 0 {
            return Ok(BlobHash::Digest(EMPTY_BLOB_SHA1.to_string()));
        }

        if !self.fits_in_memory(size) {
            debug!(path = %path.display(), size, "skipping hash above memory ceiling");
            return Ok(BlobHash::Skipped);
        }

        let content =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(BlobHash::Digest(git_blob_sha1_hex(&content)))
    }

    /// Hashing holds the content plus the framed copy, so twice the size
    /// plus headroom has to fit under the ceiling.
    fn fits_in_memory(&self, size: u64) -> bool {
        let Some(ceiling) = self.ceiling else {
            return true;
        };
        let needed = size
            .saturating_mul(2)
            .saturating_add(self.probe.current_usage())
            .saturating_add(HEADROOM_BYTES);
        needed <= ceiling
    }
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn git_blob_sha1_matches_git_hash_object() {
        assert_eq!(git_blob_sha1_hex(b""), EMPTY_BLOB_SHA1);
        assert_eq!(
            git_blob_sha1_hex(b"hello\n"),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    #[test]
    fn hash_file_returns_empty_constant_without_reading() {
        let path = test_file("empty.txt", b"");
        let hasher = ContentHasher::with_probe(Some(0), Box::new(FixedMemoryProbe(u64::MAX)));

        let hash = hasher.hash_file(&path).expect("must hash empty file");

        assert_eq!(hash, BlobHash::Digest(EMPTY_BLOB_SHA1.to_string()));
        cleanup(&path);
    }

    #[test]
    fn hash_file_skips_when_memory_guard_trips() {
        let path = test_file("large.txt", &[b'x'; 4096]);
        let hasher = ContentHasher::with_probe(
            Some(HEADROOM_BYTES + 8191),
            Box::new(FixedMemoryProbe(0)),
        );

        assert_eq!(
            hasher.hash_file(&path).expect("must evaluate guard"),
            BlobHash::Skipped
        );

        let roomy =
            ContentHasher::with_probe(Some(HEADROOM_BYTES + 8192), Box::new(FixedMemoryProbe(0)));
        assert_eq!(
            roomy.hash_file(&path).expect("must hash file"),
            BlobHash::Digest(git_blob_sha1_hex(&[b'x'; 4096]))
        );
        cleanup(&path);
    }

    #[test]
    fn hash_file_reports_missing_file() {
        let err = ContentHasher::unlimited()
            .hash_file(Path::new("/nonexistent/upshift/file.txt"))
            .expect_err("must fail for missing file");
        assert!(err.to_string().contains("failed reading metadata"));
    }

    fn test_file(name: &str, content: &[u8]) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "upshift-security-test-{}-{nanos}-{sequence}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("must create test root");
        let path = root.join(name);
        fs::write(&path, content).expect("must write test file");
        path
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }
}
