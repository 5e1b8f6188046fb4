//! Append-only parent -> children discovery record, flushed to `<target>.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::write_atomic;
use crate::url_utils::Fingerprint;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed link graph {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One crawled page: its original URL and the children it linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEntry {
    pub original: String,
    pub children: BTreeMap<Fingerprint, String>,
}

pub type GraphMap = BTreeMap<Fingerprint, GraphEntry>;

/// Link graph with a durable key set and an in-memory pending buffer.
///
/// Entries leave memory once flushed; their fingerprints stay in `durable`
/// so `contains` keeps answering for everything ever crawled.
#[derive(Debug)]
pub struct LinkGraph {
    path: PathBuf,
    durable: HashSet<Fingerprint>,
    pending: GraphMap,
    pending_bytes: usize,
    flush_threshold: usize,
}

impl LinkGraph {
    /// Open the graph at `path`, loading the keys of any previous session.
    pub fn open(path: impl Into<PathBuf>, flush_threshold: usize) -> Result<Self, GraphError> {
        let path = path.into();
        let durable = Self::load(&path)?.into_keys().collect();

        Ok(Self {
            path,
            durable,
            pending: GraphMap::new(),
            pending_bytes: 0,
            flush_threshold,
        })
    }

    /// Read a graph file; a missing file is an empty graph.
    pub fn load(path: &Path) -> Result<GraphMap, GraphError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(GraphMap::new()),
            Err(source) => {
                return Err(GraphError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(GraphMap::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| GraphError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.durable.contains(fp) || self.pending.contains_key(fp)
    }

    /// Record a crawled page. First write wins: returns `false` and changes
    /// nothing when `fp` is already known.
    pub fn record(
        &mut self,
        fp: Fingerprint,
        original: String,
        children: BTreeMap<Fingerprint, String>,
    ) -> Result<bool, GraphError> {
        if self.contains(&fp) {
            return Ok(false);
        }

        let entry = GraphEntry { original, children };
        // key + quotes, colon and separator
        self.pending_bytes += serde_json::to_vec(&entry)?.len() + 36;
        self.pending.insert(fp, entry);
        Ok(true)
    }

    pub fn get_pending(&self, fp: &Fingerprint) -> Option<&GraphEntry> {
        self.pending.get(fp)
    }

    /// Approximate serialized size of the unflushed entries.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn flush_due(&self) -> bool {
        self.pending_bytes > self.flush_threshold
    }

    /// Total number of entries, flushed or not.
    pub fn len(&self) -> usize {
        self.durable.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge pending entries into the file and release them from memory.
    ///
    /// Entries already on disk are never overwritten. Returns the number of
    /// entries written.
    pub fn flush(&mut self) -> Result<usize, GraphError> {
        if self.pending.is_empty() && self.path.exists() {
            return Ok(0);
        }

        let mut on_disk = Self::load(&self.path)?;
        let mut written = 0;
        for (fp, entry) in &self.pending {
            if !on_disk.contains_key(fp) {
                on_disk.insert(*fp, entry.clone());
                written += 1;
            }
        }

        let bytes = serde_json::to_vec(&on_disk)?;
        write_atomic(&self.path, &bytes).map_err(|source| GraphError::Io {
            path: self.path.clone(),
            source,
        })?;

        self.durable.extend(self.pending.keys().copied());
        self.pending.clear();
        self.pending_bytes = 0;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_utils::fingerprint;
    use tempfile::TempDir;

    fn children(urls: &[&str]) -> BTreeMap<Fingerprint, String> {
        urls.iter().map(|u| (fingerprint(u), u.to_string())).collect()
    }

    #[test]
    fn test_record_is_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut graph = LinkGraph::open(dir.path().join("g.json"), 1 << 20).unwrap();
        let fp = fingerprint("http://abc.onion/");

        assert!(graph.record(fp, "http://abc.onion/".into(), children(&["http://abc.onion/p1"])).unwrap());
        assert!(!graph.record(fp, "http://abc.onion/".into(), children(&["http://abc.onion/p2"])).unwrap());

        let entry = graph.get_pending(&fp).unwrap();
        assert_eq!(entry.children, children(&["http://abc.onion/p1"]));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_flush_writes_original_and_children() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.json");
        let mut graph = LinkGraph::open(&path, 1 << 20).unwrap();
        let fp = fingerprint("http://abc.onion/");
        graph
            .record(fp, "http://abc.onion/".into(), children(&["http://abc.onion/p1", "http://abc.onion/p2"]))
            .unwrap();

        assert_eq!(graph.flush().unwrap(), 1);
        assert_eq!(graph.pending_bytes(), 0);
        assert!(graph.contains(&fp));

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let entry = &raw[fp.to_hex()];
        assert_eq!(entry["original"], "http://abc.onion/");
        assert_eq!(
            entry["children"][fingerprint("http://abc.onion/p1").to_hex()],
            "http://abc.onion/p1"
        );
    }

    #[test]
    fn test_flush_merges_with_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.json");

        let mut first = LinkGraph::open(&path, 1 << 20).unwrap();
        first.record(fingerprint("http://abc.onion/a"), "http://abc.onion/a".into(), BTreeMap::new()).unwrap();
        first.flush().unwrap();

        let mut second = LinkGraph::open(&path, 1 << 20).unwrap();
        assert!(second.contains(&fingerprint("http://abc.onion/a")));
        assert!(!second.record(fingerprint("http://abc.onion/a"), "changed".into(), BTreeMap::new()).unwrap());
        second.record(fingerprint("http://abc.onion/b"), "http://abc.onion/b".into(), BTreeMap::new()).unwrap();
        second.flush().unwrap();

        let on_disk = LinkGraph::load(&path).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[&fingerprint("http://abc.onion/a")].original, "http://abc.onion/a");
    }

    #[test]
    fn test_flush_due_after_threshold() {
        let dir = TempDir::new().unwrap();
        let mut graph = LinkGraph::open(dir.path().join("g.json"), 200).unwrap();
        let mut i = 0;
        while !graph.flush_due() {
            let url = format!("http://abc.onion/page/{i}");
            graph.record(fingerprint(&url), url, BTreeMap::new()).unwrap();
            i += 1;
        }
        assert!(i > 1);
        graph.flush().unwrap();
        assert!(!graph.flush_due());
        assert_eq!(graph.len(), i);
    }

    #[test]
    fn test_empty_flush_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.json");
        let mut graph = LinkGraph::open(&path, 1 << 20).unwrap();
        assert_eq!(graph.flush().unwrap(), 0);
        assert!(path.exists());
        assert!(LinkGraph::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(LinkGraph::open(&path, 10), Err(GraphError::Malformed { .. })));
    }
}
