//! Generated image storage with bounded retention.
//!
//! Artifacts are named `generated_<YYYYMMDD>_<HHMMSS>_<style>.<ext>`. Only
//! names of that shape are ever resolved back to a path, so a filename from
//! a client can never escape the images directory.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::backends::ImageBytes;
use crate::catalog::StyleKey;

const ARTIFACT_PREFIX: &str = "generated_";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Components of a canonical artifact filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub created_at: NaiveDateTime,
    pub style: StyleKey,
    pub extension: String,
}

impl ArtifactName {
    pub fn new<Tz: TimeZone>(style: StyleKey, at: &DateTime<Tz>, extension: &str) -> Self {
        Self {
            created_at: at.naive_local(),
            style,
            extension: extension.to_string(),
        }
    }

    /// Parse a bare filename; anything that is not canonical yields `None`.
    pub fn parse(filename: &str) -> Option<Self> {
        let rest = filename.strip_prefix(ARTIFACT_PREFIX)?;
        let (stem, extension) = rest.rsplit_once('.')?;
        if !IMAGE_EXTENSIONS.contains(&extension) {
            return None;
        }

        let (date, rest) = stem.split_once('_')?;
        let (time, style) = rest.split_once('_')?;
        if date.len() != 8 || time.len() != 6 {
            return None;
        }
        if !date.bytes().chain(time.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let created_at =
            NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S").ok()?;
        let style = StyleKey::all()
            .iter()
            .copied()
            .find(|key| key.as_str() == style)?;

        Some(Self {
            created_at,
            style,
            extension: extension.to_string(),
        })
    }

    pub fn filename(&self) -> String {
        format!(
            "{}{}_{}.{}",
            ARTIFACT_PREFIX,
            self.created_at.format("%Y%m%d_%H%M%S"),
            self.style,
            self.extension
        )
    }
}

/// Directory of generated images.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `image` under its canonical name and return that name.
    ///
    /// Two images of the same style within one second share a name; the
    /// later one replaces the earlier.
    pub fn persist(
        &self,
        style: StyleKey,
        image: &ImageBytes,
        at: &DateTime<Local>,
    ) -> io::Result<String> {
        fs::create_dir_all(&self.dir)?;
        let filename = ArtifactName::new(style, at, image.extension).filename();
        fs::write(self.dir.join(&filename), &image.data)?;
        info!("Image generated successfully: {}", filename);
        Ok(filename)
    }

    /// Path of an existing artifact with a canonical name.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        ArtifactName::parse(filename)?;
        let path = self.dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Image files in the directory with their modification times.
    ///
    /// Entries that vanish or cannot be read mid-listing are skipped.
    fn list(&self) -> io::Result<Vec<(PathBuf, SystemTime)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            match fs::metadata(&path).and_then(|m| Ok((m.is_file(), m.modified()?))) {
                Ok((true, modified)) => files.push((path, modified)),
                Ok((false, _)) => {}
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(files)
    }

    /// Number of image files currently retained.
    pub fn count(&self) -> usize {
        self.list().map(|files| files.len()).unwrap_or(0)
    }

    /// Delete the oldest images until at most `max_count` remain.
    ///
    /// Best-effort: failures are logged and skipped. Returns how many files
    /// were removed.
    pub fn cleanup(&self, max_count: usize) -> usize {
        let mut files = match self.list() {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Error during image cleanup: {}", e);
                return 0;
            }
        };

        if files.len() <= max_count {
            return 0;
        }

        files.sort_by_key(|(_, modified)| *modified);
        let excess = files.len() - max_count;

        let mut removed = 0;
        for (path, _) in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    info!(
                        "Removed old image: {}",
                        path.file_name().unwrap_or_default().to_string_lossy()
                    );
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(path: &Path, modified: SystemTime) {
        fs::write(path, b"png").unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[test]
    fn canonical_name_round_trips() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = ArtifactName::new(StyleKey::RealisticVision, &at, "png");
        let filename = name.filename();
        assert_eq!(filename, "generated_20240309_070501_realistic_vision.png");
        assert_eq!(ArtifactName::parse(&filename), Some(name));
    }

    #[test]
    fn rejects_non_canonical_names() {
        for name in [
            "../etc/passwd",
            "generated_20240309_070501_realistic_vision.exe",
            "generated_2024039_070501_dreamshaper.png",
            "generated_20241309_070501_dreamshaper.png",
            "generated_20240309_070501_watercolor.png",
            "generated_20240309_070501_dreamshaper/../x.png",
            "image.png",
        ] {
            assert!(ArtifactName::parse(name).is_none(), "{name}");
        }
    }

    #[test]
    fn persist_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("images"));
        let at = Local::now();

        let filename = store
            .persist(StyleKey::Dreamshaper, &ImageBytes::png(vec![1, 2, 3]), &at)
            .unwrap();

        let path = store.resolve(&filename).expect("artifact should resolve");
        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn resolve_ignores_missing_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.png"), b"x").unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.resolve("notes.png").is_none());
        assert!(store
            .resolve("generated_20240309_070501_dreamshaper.png")
            .is_none());
    }

    #[test]
    fn cleanup_removes_oldest_excess() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let base = SystemTime::now() - Duration::from_secs(3600);

        for i in 0..15u64 {
            touch(
                &dir.path().join(format!("image_{i:02}.png")),
                base + Duration::from_secs(i * 10),
            );
        }
        fs::write(dir.path().join("readme.txt"), b"not an image").unwrap();

        assert_eq!(store.cleanup(10), 5);

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".png"))
            .collect();
        remaining.sort();
        let expected: Vec<String> = (5..15).map(|i| format!("image_{i:02}.png")).collect();
        assert_eq!(remaining, expected);
        assert!(dir.path().join("readme.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn vanished_entry_does_not_block_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let start = SystemTime::now() - Duration::from_secs(100);
        for i in 0..3u64 {
            touch(
                &dir.path().join(format!("image_{i}.png")),
                start + Duration::from_secs(i),
            );
        }
        // Listed by read_dir but gone by the time it is stat'ed.
        std::os::unix::fs::symlink(dir.path().join("gone.png"), dir.path().join("stale.png"))
            .unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.cleanup(2), 1);
        assert!(!dir.path().join("image_0.png").exists());
        assert!(dir.path().join("image_2.png").exists());
    }

    #[test]
    fn cleanup_under_limit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        touch(&dir.path().join("a.png"), SystemTime::now());
        assert_eq!(store.cleanup(10), 0);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn cleanup_of_missing_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("never-created"));
        assert_eq!(store.cleanup(0), 0);
        assert_eq!(store.count(), 0);
    }
}
