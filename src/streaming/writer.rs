//! Relay writer with per-write timeout.
//!
//! Hands framed fragments to the response body through a bounded channel.
//! A dropped receiver means the client connection is gone.

use bytes::Bytes;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

use super::framing::{encode_chunk, encode_done, encode_error};
use crate::config::Framing;
use crate::error::StreamError;
use crate::metrics;

/// Item type of the response body channel.
pub type BodyItem = Result<Bytes, Infallible>;

/// Writer feeding one streaming response body.
pub struct ChunkWriter {
    tx: mpsc::Sender<BodyItem>,
    framing: Framing,
    write_timeout: Duration,
    bytes_written: u64,
}

impl ChunkWriter {
    /// Create a writer and the receiving half that backs the response body.
    pub fn channel(
        capacity: usize,
        framing: Framing,
        write_timeout: Duration,
    ) -> (Self, mpsc::Receiver<BodyItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                framing,
                write_timeout,
                bytes_written: 0,
            },
            rx,
        )
    }

    /// Send a content fragment.
    pub async fn send_chunk(&mut self, content: &str) -> Result<(), StreamError> {
        let data = encode_chunk(self.framing, content);
        self.write_with_timeout(data).await
    }

    /// Send the done marker, if the framing has one.
    pub async fn send_done(&mut self) -> Result<(), StreamError> {
        match encode_done(self.framing) {
            Some(data) => self.write_with_timeout(data).await,
            None => Ok(()),
        }
    }

    /// Send a relay-injected error.
    pub async fn send_error(&mut self, message: &str) -> Result<(), StreamError> {
        let data = encode_error(self.framing, message);
        self.write_with_timeout(data).await
    }

    /// Resolves when the client side of the body has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Get total bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn write_with_timeout(&mut self, data: Bytes) -> Result<(), StreamError> {
        let len = data.len() as u64;
        tokio::time::timeout(self.write_timeout, self.tx.send(Ok(data)))
            .await
            .map_err(|_| StreamError::Timeout)?
            .map_err(|_| StreamError::ClientDisconnected)?;

        self.bytes_written += len;
        metrics::record_bytes_sent(len);
        Ok(())
    }
}
