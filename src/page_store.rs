//! Raw page persistence: crawled pages by fingerprint, captcha pages by time.

use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::url_utils::Fingerprint;

#[derive(Debug, Clone)]
pub struct PageStore {
    page_dir: PathBuf,
    quarantine_dir: PathBuf,
    target: String,
}

impl PageStore {
    pub fn new(data_dir: &Path, target: &str) -> Self {
        Self {
            page_dir: data_dir.join(target),
            quarantine_dir: data_dir.join(Config::QUARANTINE_DIR),
            target: target.to_string(),
        }
    }

    pub fn page_dir(&self) -> &Path {
        &self.page_dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn page_path(&self, fp: &Fingerprint) -> PathBuf {
        self.page_dir.join(format!("{fp}.html"))
    }

    pub fn save_page(&self, fp: &Fingerprint, content: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.page_dir)?;
        let path = self.page_path(fp);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Keep a block page for later classifier work. Never touches crawl state.
    pub fn quarantine(&self, content: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.quarantine_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let path = self
            .quarantine_dir
            .join(format!("{}-{stamp}.html", self.target));
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Stored pages of this target as (fingerprint, path), sorted by fingerprint.
    pub fn list_pages(&self) -> std::io::Result<Vec<(Fingerprint, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.page_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut pages = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(fp) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<Fingerprint>().ok())
            else {
                continue;
            };
            pages.push((fp, path));
        }
        pages.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_utils::fingerprint;
    use tempfile::TempDir;

    #[test]
    fn test_save_page_by_fingerprint() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::new(dir.path(), "nexus");
        let fp = fingerprint("http://abc.onion/");

        let path = store.save_page(&fp, "<html>home</html>").unwrap();
        assert_eq!(path, dir.path().join("nexus").join(format!("{}.html", fp.to_hex())));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<html>home</html>");
    }

    #[test]
    fn test_quarantine_is_keyed_by_target_and_time() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::new(dir.path(), "nexus");

        let path = store.quarantine("captcha").unwrap();
        assert!(path.starts_with(dir.path().join("quarantine")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("nexus-"));
        assert!(name.ends_with(".html"));
        assert!(!dir.path().join("nexus").exists());
    }

    #[test]
    fn test_list_pages_skips_other_files() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::new(dir.path(), "nexus");
        let a = fingerprint("http://abc.onion/a");
        let b = fingerprint("http://abc.onion/b");
        store.save_page(&a, "a").unwrap();
        store.save_page(&b, "b").unwrap();
        std::fs::write(store.page_dir().join("nexus.json"), "{}").unwrap();
        std::fs::write(store.page_dir().join("notes.html"), "x").unwrap();

        let listed: Vec<Fingerprint> = store.list_pages().unwrap().into_iter().map(|(fp, _)| fp).collect();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_list_pages_of_unknown_target() {
        let dir = TempDir::new().unwrap();
        assert!(PageStore::new(dir.path(), "none").list_pages().unwrap().is_empty());
    }
}
