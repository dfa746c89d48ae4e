//! Chunk transport
//!
//! Carries encoded segments from the capture side to the storage side.
//! Sending never blocks and is never acknowledged; the receiver observes
//! chunks in exactly the order they were sent.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Immutable encoded segment. Crosses process boundaries as a plain byte array.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk(Bytes);

impl Chunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk(Bytes::from(bytes))
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk(bytes)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({} bytes)", self.0.len())
    }
}

impl Serialize for Chunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for Chunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(Chunk::from)
    }
}

pub struct ChunkTransport;

impl ChunkTransport {
    /// Ordered, unbounded chunk channel
    pub fn channel() -> (ChunkSender, ChunkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChunkSender { tx }, ChunkReceiver { rx })
    }
}

/// Capture-side half of the transport
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl ChunkSender {
    /// Fire-and-forget. A chunk sent after the receiver is gone is lost.
    pub fn send(&self, chunk: impl Into<Chunk>) {
        let chunk = chunk.into();
        let len = chunk.len();
        if self.tx.send(chunk).is_err() {
            tracing::warn!("Dropping {} byte chunk: storage side closed", len);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Storage-side half of the transport
pub struct ChunkReceiver {
    rx: mpsc::UnboundedReceiver<Chunk>,
}

impl ChunkReceiver {
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    /// Next chunk if one is already queued
    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }

    /// Deliver every chunk to `handler` in send order until all senders are dropped
    pub fn on_chunk<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Chunk) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(chunk) = self.rx.recv().await {
                handler(chunk);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_randomized_chunks_arrive_byte_exact() {
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let (tx, rx) = ChunkTransport::channel();
            let received = Arc::new(Mutex::new(Vec::new()));
            let sink = received.clone();
            let handle = rx.on_chunk(move |chunk| sink.lock().unwrap().extend_from_slice(chunk.as_bytes()));

            let count = rng.gen_range(1..40);
            let mut sent = Vec::new();
            for _ in 0..count {
                let size = rng.gen_range(0..4096);
                let chunk: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
                sent.extend_from_slice(&chunk);
                tx.send(chunk);
            }
            drop(tx);
            handle.await.unwrap();

            assert_eq!(*received.lock().unwrap(), sent);
        }
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = ChunkTransport::channel();
        drop(rx);
        tx.send(vec![1, 2, 3]);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_chunk_serializes_as_plain_array() {
        let chunk = Chunk::from(vec![0x1a, 0x45, 0xdf, 0xa3]);
        assert_eq!(serde_json::to_string(&chunk).unwrap(), "[26,69,223,163]");
        let back: Chunk = serde_json::from_str("[26,69,223,163]").unwrap();
        assert_eq!(back, chunk);
    }
}
