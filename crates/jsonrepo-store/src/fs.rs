//! Filesystem collaborators.
//!
//! The store never touches `std::fs` or `tokio::fs` directly; it goes
//! through [`FileSystem`] on the blocking path and [`AsyncFileSystem`] on
//! the awaitable path. Both must produce the same observable results.
//! [`OsFileSystem`] implements both against the real filesystem; tests
//! substitute wrappers that count or intercept calls.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// Blocking filesystem operations used by the store.
pub trait FileSystem: Send + Sync {
    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and any missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create an empty file at `path`, truncating an existing one.
    fn create_file(&self, path: &Path) -> io::Result<()>;

    /// Read the whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the whole file with `contents`.
    ///
    /// Readers must observe either the old or the new contents, never a
    /// partially written file.
    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Append `contents` to the end of the file.
    fn append_string(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// Awaitable filesystem operations used by the store.
#[async_trait]
pub trait AsyncFileSystem: Send + Sync {
    /// Whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create an empty file at `path`, truncating an existing one.
    async fn create_file(&self, path: &Path) -> io::Result<()>;

    /// Read the whole file as UTF-8 text.
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the whole file with `contents`. Same visibility rules as
    /// [`FileSystem::write_string`].
    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Append `contents` to the end of the file.
    async fn append_string(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// The real filesystem: `std::fs` for blocking calls, `tokio::fs` for
/// awaitable ones.
///
/// Whole-file writes go to a temp file in the target's directory which is
/// then renamed over the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    fn replace_file(path: &Path, contents: &str) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".jsonrepo-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl FileSystem for OsFileSystem {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        std::fs::File::create(path).map(drop)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        Self::replace_file(path, contents)
    }

    fn append_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
        file.write_all(contents.as_bytes())
    }
}

#[async_trait]
impl AsyncFileSystem for OsFileSystem {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::File::create(path).await.map(drop)
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        // tempfile is blocking; run the replace off the async workers.
        let path = path.to_path_buf();
        let contents = contents.to_owned();
        tokio::task::spawn_blocking(move || Self::replace_file(&path, &contents))
            .await
            .map_err(io::Error::other)?
    }

    async fn append_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await
    }
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        (**self).exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir_all(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        (**self).create_file(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        (**self).write_string(path, contents)
    }

    fn append_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        (**self).append_string(path, contents)
    }
}

#[async_trait]
impl<F: AsyncFileSystem + ?Sized> AsyncFileSystem for Arc<F> {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        (**self).exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path) -> io::Result<()> {
        (**self).create_file(path).await
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path).await
    }

    async fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        (**self).write_string(path, contents).await
    }

    async fn append_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        (**self).append_string(path, contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_create_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("items.json");
        let fs = OsFileSystem;

        assert!(!FileSystem::exists(&fs, &path).unwrap());
        FileSystem::create_dir_all(&fs, path.parent().unwrap()).unwrap();
        FileSystem::create_file(&fs, &path).unwrap();
        FileSystem::append_string(&fs, &path, "[").unwrap();
        FileSystem::append_string(&fs, &path, "]").unwrap();

        assert!(FileSystem::exists(&fs, &path).unwrap());
        assert_eq!(FileSystem::read_to_string(&fs, &path).unwrap(), "[]");
    }

    #[test]
    fn blocking_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let fs = OsFileSystem;

        FileSystem::write_string(&fs, &path, "[1,2,3]").unwrap();
        FileSystem::write_string(&fs, &path, "[]").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn append_to_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSystem::append_string(&OsFileSystem, &dir.path().join("nope.json"), "[]")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn async_matches_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("items.json");
        let fs = OsFileSystem;

        assert!(!AsyncFileSystem::exists(&fs, &path).await.unwrap());
        AsyncFileSystem::create_dir_all(&fs, path.parent().unwrap())
            .await
            .unwrap();
        AsyncFileSystem::create_file(&fs, &path).await.unwrap();
        AsyncFileSystem::append_string(&fs, &path, "[]").await.unwrap();
        assert_eq!(
            AsyncFileSystem::read_to_string(&fs, &path).await.unwrap(),
            "[]"
        );

        AsyncFileSystem::write_string(&fs, &path, "[true]").await.unwrap();
        assert_eq!(FileSystem::read_to_string(&fs, &path).unwrap(), "[true]");
    }

    #[test]
    fn arc_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let fs = Arc::new(OsFileSystem);
        FileSystem::write_string(&fs, &path, "[]").unwrap();
        assert!(FileSystem::exists(&fs, &path).unwrap());
    }
}
