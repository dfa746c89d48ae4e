//! Raw recording file writer
//!
//! Appends chunks to the raw file on a dedicated task, in arrival order.
//! Closing waits for every queued chunk to hit the disk.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::transport::Chunk;

/// Totals reported when the file is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub bytes_written: u64,
    pub chunks: u64,
}

pub struct ChunkWriter {
    path: PathBuf,
    tx: mpsc::UnboundedSender<Chunk>,
    task: JoinHandle<io::Result<WriteStats>>,
}

impl ChunkWriter {
    /// Create the file empty and open it for appending
    pub async fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();
        let log_path = path.to_path_buf();
        let task = tokio::spawn(async move {
            let mut stats = WriteStats::default();
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = file.write_all(chunk.as_bytes()).await {
                    tracing::error!("Failed to append chunk to {:?}: {}", log_path, e);
                    return Err(e);
                }
                stats.bytes_written += chunk.len() as u64;
                stats.chunks += 1;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(stats)
        });

        tracing::debug!("Opened recording file {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            tx,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a chunk. Returns false if the writer has failed.
    pub fn append(&self, chunk: Chunk) -> bool {
        self.tx.send(chunk).is_ok()
    }

    /// Flush everything queued so far and close the file
    pub async fn close(self) -> io::Result<WriteStats> {
        drop(self.tx);
        let stats = self
            .task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        tracing::info!(
            "Closed recording file {:?}: {} chunks, {} bytes",
            self.path,
            stats.chunks,
            stats.bytes_written
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_chunks_are_appended_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.webm");

        let writer = ChunkWriter::create(&path).await.unwrap();
        assert!(path.exists());
        assert!(writer.append(Chunk::from(b"abc".to_vec())));
        assert!(writer.append(Chunk::from(Vec::new())));
        assert!(writer.append(Chunk::from(b"def".to_vec())));

        let stats = writer.close().await.unwrap();
        assert_eq!(stats, WriteStats { bytes_written: 6, chunks: 3 });
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_create_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.webm");
        std::fs::write(&path, b"stale").unwrap();

        let writer = ChunkWriter::create(&path).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_append_reports_failed_writer() {
        let writer = ChunkWriter::create(Path::new("/dev/full")).await.unwrap();

        let mut accepted = 0;
        while writer.append(Chunk::from(vec![0u8; 4096])) {
            accepted += 1;
            assert!(accepted < 500, "writer never failed");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(writer.close().await.is_err());
    }
}
