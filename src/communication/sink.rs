// src/communication/sink.rs - Where emitted G-code instructions go
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

use crate::error::{LiveError, Result};

/// Accepts one instruction at a time, in order.
///
/// Errors returned here are device errors and make the command scheduler
/// restart itself.
#[async_trait]
pub trait InstructionSink: Send + Sync {
    async fn send(&self, instruction: &str) -> Result<()>;
}

#[async_trait]
impl<S: InstructionSink + ?Sized> InstructionSink for Arc<S> {
    async fn send(&self, instruction: &str) -> Result<()> {
        (**self).send(instruction).await
    }
}

/// Keeps every instruction in memory. Used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().await)
    }
}

#[async_trait]
impl InstructionSink for RecordingSink {
    async fn send(&self, instruction: &str) -> Result<()> {
        self.lines.lock().await.push(instruction.to_string());
        Ok(())
    }
}

/// Writes newline-terminated instructions to any async writer, e.g. stdout.
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> InstructionSink for WriterSink<W> {
    async fn send(&self, instruction: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let io = |e: std::io::Error| LiveError::Device(e.to_string());
        writer.write_all(instruction.as_bytes()).await.map_err(io)?;
        writer.write_all(b"\n").await.map_err(io)?;
        writer.flush().await.map_err(io)
    }
}

/// Hands instructions to a transport task over an mpsc channel.
pub struct ChannelSink {
    sender: Sender<String>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, Receiver<String>) {
        let (sender, receiver) = channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl InstructionSink for ChannelSink {
    async fn send(&self, instruction: &str) -> Result<()> {
        self.sender
            .send(instruction.to_string())
            .await
            .map_err(|_| LiveError::Device("instruction channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_sink_appends_newlines() {
        let sink = WriterSink::new(Vec::<u8>::new());
        sink.send("G28").await.unwrap();
        sink.send("M105").await.unwrap();
        let written = sink.writer.lock().await.clone();
        assert_eq!(String::from_utf8(written).unwrap(), "G28\nM105\n");
    }

    #[tokio::test]
    async fn test_closed_channel_is_device_error() {
        let (sink, receiver) = ChannelSink::new(4);
        drop(receiver);
        let err = sink.send("G28").await.unwrap_err();
        assert!(err.is_device());
    }

    #[tokio::test]
    async fn test_recording_sink_take_clears() {
        let sink = RecordingSink::new();
        sink.send("G90").await.unwrap();
        assert_eq!(sink.take().await, vec!["G90".to_string()]);
        assert!(sink.lines().await.is_empty());
    }
}
