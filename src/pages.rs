//! Page cache: template files loaded into memory, keyed by id and by path

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Cache id of the default error page
pub const ERROR_PAGE_ID: &str = "ERROR";

/// Cache id of the default splash page
pub const SPLASH_PAGE_ID: &str = "SPLASH";

/// In-memory page templates.
///
/// Entries live until the whole cache is replaced by a reload; there is no
/// TTL. Absence of a page is a checked state, never an error.
#[derive(Debug, Clone, Default)]
pub struct PageCache {
    by_id: HashMap<String, String>,
    by_path: HashMap<PathBuf, String>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a page file and cache it under `id` and under its source path.
    /// When `id` is omitted the path itself is the id.
    ///
    /// A failed read logs a warning and leaves any previously cached value
    /// for those keys untouched; partial or empty content is never cached
    /// in its place.
    pub fn load(&mut self, path: &Path, id: Option<&str>) {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error loading page. Skipping");
                return;
            }
        };

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());

        self.by_path.insert(path.to_path_buf(), contents.clone());
        self.by_id.insert(id, contents);
    }

    pub fn get_by_id(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn get_by_path(&self, path: &Path) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_caches_by_id_and_path() {
        let dir = TempDir::new().unwrap();
        let path = page_file(&dir, "splash.html", "<h1>hello</h1>");

        let mut cache = PageCache::new();
        cache.load(&path, Some("SPLASH"));

        assert_eq!(cache.get_by_id("SPLASH"), Some("<h1>hello</h1>"));
        assert_eq!(cache.get_by_path(&path), Some("<h1>hello</h1>"));
    }

    #[test]
    fn test_missing_id_defaults_to_path() {
        let dir = TempDir::new().unwrap();
        let path = page_file(&dir, "page.html", "body");

        let mut cache = PageCache::new();
        cache.load(&path, None);

        assert_eq!(cache.get_by_id(&path.display().to_string()), Some("body"));
    }

    #[test]
    fn test_missing_file_is_a_checked_absence() {
        let dir = TempDir::new().unwrap();

        let mut cache = PageCache::new();
        cache.load(&dir.path().join("nope.html"), Some("nope"));

        assert_eq!(cache.get_by_id("nope"), None);
        assert_eq!(cache.get_by_path(&dir.path().join("nope.html")), None);
    }

    #[test]
    fn test_failed_load_keeps_previous_entry() {
        let dir = TempDir::new().unwrap();
        let path = page_file(&dir, "page.html", "original");

        let mut cache = PageCache::new();
        cache.load(&path, Some("page"));

        fs::remove_file(&path).unwrap();
        cache.load(&path, Some("page"));

        assert_eq!(cache.get_by_id("page"), Some("original"));
        assert_eq!(cache.get_by_path(&path), Some("original"));
    }

    #[test]
    fn test_reload_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = page_file(&dir, "page.html", "old");

        let mut cache = PageCache::new();
        cache.load(&path, Some("page"));

        fs::write(&path, "new").unwrap();
        cache.load(&path, Some("page"));

        assert_eq!(cache.get_by_id("page"), Some("new"));
    }
}
