//! JSON-lines framing
//!
//! Both ends of the module protocol speak newline-delimited JSON over a pair
//! of byte streams (the child's stdin/stdout on the host side, the process's
//! own stdio on the module side).

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::module::traits::ModuleError;

/// Upper bound on a single protocol line
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A framed, typed duplex channel over a reader and a writer
pub struct JsonLines<R, W> {
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
}

impl<R, W> JsonLines<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(writer, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }
    }

    /// Serialize `message` and write it as one line
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ModuleError> {
        let line = serde_json::to_string(message)?;
        self.writer
            .send(line)
            .await
            .map_err(|e| ModuleError::IpcError(format!("Failed to send message: {}", e)))
    }

    /// Read the next non-blank line and parse it; `None` once the stream closed
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ModuleError> {
        loop {
            let line = match self.reader.next().await {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(ModuleError::IpcError(format!("Failed to read message: {}", e)))
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&line)?));
        }
    }

    /// Split back into the underlying reader and writer
    pub fn into_inner(self) -> (R, W) {
        (self.reader.into_inner(), self.writer.into_inner())
    }
}
