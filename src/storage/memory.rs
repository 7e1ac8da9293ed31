use super::Storage;
use crate::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// In-memory [`Storage`] backed by a growable byte buffer. Used by tests and
/// any caller that passes an all-in-memory [`super::StorageFactory`].
#[derive(Default)]
pub struct MemoryStorage {
    buf: Mutex<Option<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn stat(&self) -> Result<Option<u64>> {
        Ok(self.buf.lock().await.as_ref().map(|b| b.len() as u64))
    }

    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let guard = self.buf.lock().await;
        let mut out = vec![0u8; len];
        if let Some(buf) = guard.as_ref() {
            let offset = offset as usize;
            let avail = buf.len().saturating_sub(offset);
            let n = avail.min(len);
            if n > 0 {
                out[..n].copy_from_slice(&buf[offset..offset + n]);
            }
        }
        Ok(out)
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut guard = self.buf.lock().await;
        let buf = guard.get_or_insert_with(Vec::new);
        let offset = offset as usize;
        let end = offset + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    async fn del(&self, offset: u64, len: u64) -> Result<()> {
        let mut guard = self.buf.lock().await;
        if let Some(buf) = guard.as_mut() {
            let offset = offset as usize;
            let len = len as usize;
            if offset < buf.len() {
                let end = (offset + len).min(buf.len());
                buf.drain(offset..end);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn unlink(&self) -> Result<()> {
        *self.buf.lock().await = None;
        Ok(())
    }
}
