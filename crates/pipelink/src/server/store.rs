//! Repository files kept in a local directory

use crate::error::{Error, Result};
use crate::rest::{FileInfo, FileType, Handle};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// Remote prefix naming a local directory.
pub const LOCAL_PREFIX: &str = "local:";

/// Directory-backed repository storage
///
/// Data files are fanned out into `data/<first two chars>/`; every other
/// type lives directly in its own directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for a remote of the form `local:<path>`
    pub fn from_remote(remote: &str) -> Result<Self> {
        match remote.strip_prefix(LOCAL_PREFIX) {
            Some(path) if !path.is_empty() => Ok(Self::new(path)),
            _ => Err(Error::Config(format!(
                "unsupported remote {remote:?}, expected {LOCAL_PREFIX}<path>"
            ))),
        }
    }

    /// Repository root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, handle: &Handle) -> Result<PathBuf> {
        handle.validate()?;
        Ok(match handle.kind {
            FileType::Config => self.root.join("config"),
            FileType::Data => match handle.name.get(..2) {
                Some(prefix) => self.root.join("data").join(prefix).join(&handle.name),
                None => self.root.join("data").join(&handle.name),
            },
            kind => self.root.join(kind.dir()).join(&handle.name),
        })
    }

    /// Create the directory layout
    pub async fn create(&self) -> Result<()> {
        for kind in FileType::ALL.into_iter().filter(|k| *k != FileType::Config) {
            tokio::fs::create_dir_all(self.root.join(kind.dir())).await?;
        }
        tracing::info!(root = %self.root.display(), "repository created");
        Ok(())
    }

    /// Write `data` to `handle`, replacing any previous content atomically
    pub async fn save(&self, handle: &Handle, data: &[u8]) -> Result<()> {
        let path = self.path(handle)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidHandle(handle.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let partial = parent.join(format!(".{}.partial", file_name(&path)));
        tokio::fs::write(&partial, data).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    /// Read the whole file, or `[start, end]` inclusive when `end` is given
    pub async fn load(&self, handle: &Handle, start: u64, end: Option<u64>) -> Result<Bytes> {
        let path = self.path(handle)?;
        let data = tokio::fs::read(&path).await.map_err(|e| not_found(e, handle))?;

        let len = data.len() as u64;
        if start > len || (start == len && len > 0) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{handle}: range start {start} beyond size {len}"),
            )));
        }
        let end = end.map_or(len, |e| e.saturating_add(1).min(len));
        Ok(Bytes::from(data).slice(start as usize..end.max(start) as usize))
    }

    /// Size of the file behind `handle`
    pub async fn stat(&self, handle: &Handle) -> Result<u64> {
        let path = self.path(handle)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found(e, handle))?;
        Ok(meta.len())
    }

    /// Delete the file behind `handle`
    pub async fn remove(&self, handle: &Handle) -> Result<()> {
        let path = self.path(handle)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found(e, handle))
    }

    /// Names and sizes of all files of `kind`
    pub async fn list(&self, kind: FileType) -> Result<Vec<FileInfo>> {
        let dir = self.root.join(kind.dir());
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(kind.dir().to_string()),
            _ => Error::Io(e),
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() && kind == FileType::Data {
                collect_files(&entry.path(), &mut files).await?;
            } else if meta.is_file() {
                push_file(&entry.path(), meta.len(), &mut files);
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

async fn collect_files(dir: &Path, files: &mut Vec<FileInfo>) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            push_file(&entry.path(), meta.len(), files);
        }
    }
    Ok(())
}

fn push_file(path: &Path, size: u64, files: &mut Vec<FileInfo>) {
    let name = file_name(path);
    // skip in-progress writes
    if !name.starts_with('.') {
        files.push(FileInfo { name, size });
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn not_found(err: io::Error, handle: &Handle) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(handle.to_string()),
        _ => Error::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote() {
        let store = LocalStore::from_remote("local:/srv/repo").unwrap();
        assert_eq!(store.root(), Path::new("/srv/repo"));

        assert!(LocalStore::from_remote("b2:bucket").is_err());
        assert!(LocalStore::from_remote("local:").is_err());
    }

    #[tokio::test]
    async fn test_data_files_are_fanned_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create().await.unwrap();

        let handle = Handle::new(FileType::Data, "abcdef");
        store.save(&handle, b"pack contents").await.unwrap();

        assert!(dir.path().join("data/ab/abcdef").is_file());
        assert_eq!(store.stat(&handle).await.unwrap(), 13);
        assert_eq!(
            store.list(FileType::Data).await.unwrap(),
            vec![FileInfo {
                name: "abcdef".to_string(),
                size: 13
            }]
        );
    }

    #[tokio::test]
    async fn test_ranged_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let handle = Handle::new(FileType::Index, "idx");
        store.save(&handle, b"0123456789").await.unwrap();

        assert_eq!(&store.load(&handle, 0, None).await.unwrap()[..], b"0123456789");
        assert_eq!(&store.load(&handle, 2, Some(4)).await.unwrap()[..], b"234");
        assert_eq!(&store.load(&handle, 7, None).await.unwrap()[..], b"789");
        assert_eq!(&store.load(&handle, 8, Some(100)).await.unwrap()[..], b"89");
        assert_eq!(
            &store.load(&handle, 3, Some(u64::MAX)).await.unwrap()[..],
            b"3456789"
        );
        assert!(store.load(&handle, 11, None).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let handle = Handle::new(FileType::Key, "nope");

        assert!(store.stat(&handle).await.unwrap_err().is_not_found());
        assert!(store.load(&handle, 0, None).await.unwrap_err().is_not_found());
        assert!(store.remove(&handle).await.unwrap_err().is_not_found());
        assert!(store.list(FileType::Lock).await.unwrap_err().is_not_found());
    }
}
