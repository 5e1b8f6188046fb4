//! Durable snapshot and restore of the Frontier and Link Graph.
//!
//! The frontier file (`<target>-queue`) is an rkyv archive of
//! `FrontierSnapshot`, validated on load.

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::frontier::Frontier;
use crate::link_graph::{GraphError, LinkGraph};

pub const QUEUE_VERSION: u16 = 1;

/// Pending URLs in dispatch order, tagged with the format version.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct FrontierSnapshot {
    pub version: u16,
    pub urls: Vec<String>,
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt frontier checkpoint: {0}")]
    Corrupt(String),

    #[error("Failed to serialize frontier checkpoint: {0}")]
    Serialization(String),

    #[error("Unsupported frontier checkpoint version {0}")]
    UnsupportedVersion(u16),

    #[error("Link graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Checkpoint files of one crawl target, all under `<data-dir>/<target>/`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
    target: String,
}

impl Checkpoint {
    pub fn new(data_dir: &Path, target: &str) -> Self {
        Self {
            dir: data_dir.join(target),
            target: target.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn queue_path(&self) -> PathBuf {
        self.dir.join(format!("{}-queue", self.target))
    }

    pub fn graph_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.target))
    }

    pub fn save_frontier(&self, frontier: &Frontier) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir)?;
        write_atomic(&self.queue_path(), &encode_frontier(frontier.checkpoint_urls())?)?;
        debug!(
            pending = frontier.len(),
            deferred = frontier.deferred_len(),
            "frontier checkpoint written"
        );
        Ok(())
    }

    /// Replace `frontier` with the saved queue. Returns `false` when no
    /// checkpoint exists, leaving `frontier` untouched.
    pub fn load_frontier(&self, frontier: &mut Frontier) -> Result<bool, CheckpointError> {
        let bytes = match std::fs::read(self.queue_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        *frontier = Frontier::from_urls(decode_frontier(&bytes)?);
        info!(pending = frontier.len(), "frontier checkpoint loaded");
        Ok(true)
    }

    /// Persist both halves of the crawl state. Every way out of the crawl
    /// loop goes through here.
    pub fn flush(&self, frontier: &Frontier, graph: &mut LinkGraph) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir)?;
        let written = graph.flush()?;
        self.save_frontier(frontier)?;
        info!(
            graph_entries = graph.len(),
            written,
            pending = frontier.len(),
            "crawl state flushed"
        );
        Ok(())
    }
}

pub fn encode_frontier<'a, I>(urls: I) -> Result<AlignedVec, CheckpointError>
where
    I: IntoIterator<Item = &'a str>,
{
    let snapshot = FrontierSnapshot {
        version: QUEUE_VERSION,
        urls: urls.into_iter().map(str::to_string).collect(),
    };
    rkyv::to_bytes::<_, 1024>(&snapshot).map_err(|e| CheckpointError::Serialization(e.to_string()))
}

pub fn decode_frontier(bytes: &[u8]) -> Result<Vec<String>, CheckpointError> {
    // Archives must be read from aligned memory
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let snapshot: FrontierSnapshot = rkyv::from_bytes(&aligned).map_err(|_| {
        CheckpointError::Corrupt(format!("{} bytes do not hold a valid frontier snapshot", bytes.len()))
    })?;
    if snapshot.version != QUEUE_VERSION {
        return Err(CheckpointError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot.urls)
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)
    })();

    if result.is_err() && tmp_path.exists() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_utils::fingerprint;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn urls() -> Vec<String> {
        vec![
            "http://abc.onion/u1".to_string(),
            "http://abc.onion/u2".to_string(),
            "http://abc.onion/u3".to_string(),
        ]
    }

    #[test]
    fn test_frontier_round_trip_keeps_order() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nexus");
        checkpoint.save_frontier(&Frontier::from_urls(urls())).unwrap();

        let mut restored = Frontier::new();
        assert!(checkpoint.load_frontier(&mut restored).unwrap());
        let restored: Vec<&str> = restored.urls().collect();
        assert_eq!(restored, urls());
    }

    #[test]
    fn test_missing_checkpoint_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nexus");
        let mut frontier = Frontier::from_urls(vec!["http://abc.onion/".to_string()]);

        assert!(!checkpoint.load_frontier(&mut frontier).unwrap());
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_paths_follow_target_name() {
        let checkpoint = Checkpoint::new(Path::new("/data"), "nexus");
        assert_eq!(checkpoint.queue_path(), Path::new("/data/nexus/nexus-queue"));
        assert_eq!(checkpoint.graph_path(), Path::new("/data/nexus/nexus.json"));
    }

    #[test]
    fn test_empty_frontier_round_trips() {
        let bytes = encode_frontier(std::iter::empty::<&str>()).unwrap();
        assert!(decode_frontier(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(decode_frontier(b""), Err(CheckpointError::Corrupt(_))));

        let mut truncated = encode_frontier(["http://abc.onion/long"]).unwrap().to_vec();
        truncated.truncate(truncated.len() / 2);
        assert!(matches!(decode_frontier(&truncated), Err(CheckpointError::Corrupt(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let snapshot = FrontierSnapshot {
            version: QUEUE_VERSION + 1,
            urls: vec!["http://abc.onion/".to_string()],
        };
        let bytes = rkyv::to_bytes::<_, 1024>(&snapshot).unwrap();
        assert!(matches!(
            decode_frontier(&bytes),
            Err(CheckpointError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_deferred_urls_are_checkpointed_after_the_queue() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nexus");
        let mut frontier = Frontier::from_urls(urls());
        let failed = frontier.pop().unwrap();
        frontier.defer(failed);

        checkpoint.save_frontier(&frontier).unwrap();

        let mut restored = Frontier::new();
        checkpoint.load_frontier(&mut restored).unwrap();
        let restored: Vec<&str> = restored.urls().collect();
        assert_eq!(
            restored,
            vec!["http://abc.onion/u2", "http://abc.onion/u3", "http://abc.onion/u1"]
        );
    }

    #[test]
    fn test_corrupt_file_is_an_error_not_a_fresh_start() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nexus");
        std::fs::create_dir_all(checkpoint.dir()).unwrap();
        std::fs::write(checkpoint.queue_path(), b"garbage").unwrap();

        let mut frontier = Frontier::new();
        assert!(checkpoint.load_frontier(&mut frontier).is_err());
    }

    #[test]
    fn test_flush_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nexus");
        let mut graph = LinkGraph::open(checkpoint.graph_path(), 1 << 20).unwrap();
        graph
            .record(fingerprint("http://abc.onion/"), "http://abc.onion/".into(), BTreeMap::new())
            .unwrap();

        checkpoint.flush(&Frontier::from_urls(urls()), &mut graph).unwrap();

        assert!(checkpoint.queue_path().exists());
        assert_eq!(LinkGraph::load(&checkpoint.graph_path()).unwrap().len(), 1);
        assert!(!dir.path().join("nexus/nexus-queue.tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }
}
