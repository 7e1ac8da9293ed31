use super::Storage;
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// One regular file per named region. Positioned reads and writes run on
/// [`tokio::task::spawn_blocking`] so they never stall the executor, the same
/// way the teacher keeps its own file I/O off the async path for mapped files.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn open_rw(&self) -> Result<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("failed to open storage file: {}", self.path.display()))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn stat(&self) -> Result<Option<u64>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("failed to stat storage file: {}", path.display()))),
        })
        .await?
    }

    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = vec![0u8; len];
            let mut file = match OpenOptions::new().read(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
                Err(e) => {
                    return Err(anyhow::Error::from(e)
                        .context(format!("failed to open storage file: {}", path.display())))
                }
            };
            let file_len = file.metadata()?.len();
            if offset >= file_len {
                return Ok(out);
            }
            file.seek(SeekFrom::Start(offset))?;
            let n = (file_len - offset).min(len as u64) as usize;
            file.read_exact(&mut out[..n])
                .with_context(|| format!("failed to read storage file: {}", path.display()))?;
            Ok(out)
        })
        .await?
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let path = self.path.clone();
        let data = data.to_vec();
        let this_path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .with_context(|| format!("failed to open storage file: {}", this_path.display()))?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&data)
                .with_context(|| format!("failed to write storage file: {}", this_path.display()))?;
            Ok(())
        })
        .await?
    }

    async fn del(&self, offset: u64, len: u64) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(anyhow::Error::from(e)),
            };
            let file_len = file.metadata()?.len();
            if offset >= file_len {
                return Ok(());
            }
            let zero_len = (file_len - offset).min(len) as usize;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&vec![0u8; zero_len])?;
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn unlink(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::from(e)),
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("a/b/core.bin"));
        storage.write(4096, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(storage.stat().await.unwrap(), Some(4100));
        assert_eq!(storage.read(4096, 4).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn stat_on_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nope.bin"));
        assert_eq!(storage.stat().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unlink_removes_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("core.bin"));
        storage.write(0, &[1]).await.unwrap();
        storage.unlink().await.unwrap();
        assert_eq!(storage.stat().await.unwrap(), None);
    }
}
