//! Host-side IPC client
//!
//! Sends requests to a module process and waits for the matching reply.
//! Requests are strictly sequential. A reply to an earlier request that timed
//! out is read past and dropped; a reply carrying an id that was never sent
//! is a protocol error.

use std::cmp::Ordering;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::module::ipc::channel::JsonLines;
use crate::module::ipc::protocol::{CorrelationId, HostMessage, HostRequest, ModuleReply, ReplyPayload};
use crate::module::traits::ModuleError;

/// IPC client for the host to drive one module process
pub struct ModuleIpcClient<R, W> {
    channel: JsonLines<R, W>,
    next_correlation_id: CorrelationId,
    request_timeout: Duration,
}

impl<R, W> ModuleIpcClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, request_timeout: Duration) -> Self {
        Self {
            channel: JsonLines::new(reader, writer),
            next_correlation_id: 1,
            request_timeout,
        }
    }

    /// Send a request and wait for its reply
    ///
    /// An `error` reply is returned as a payload, not as `Err`; callers
    /// decide how a module-side failure maps onto their operation.
    pub async fn request(&mut self, request: HostRequest) -> Result<ReplyPayload, ModuleError> {
        let wait = self.request_timeout;
        self.request_within(request, wait).await
    }

    /// Like [`request`](Self::request) with an explicit timeout
    pub async fn request_within(
        &mut self,
        request: HostRequest,
        wait: Duration,
    ) -> Result<ReplyPayload, ModuleError> {
        let id = self.next_correlation_id();
        let kind = request.kind();
        self.channel.send(&HostMessage { id, request }).await?;
        debug!("Sent {} request with correlation_id={}", kind, id);

        timeout(wait, self.recv_reply(id, kind))
            .await
            .map_err(|_| ModuleError::Timeout)?
    }

    /// Send a request that must be answered with `ok`
    pub async fn request_ok(&mut self, request: HostRequest) -> Result<(), ModuleError> {
        let kind = request.kind();
        expect_ok(kind, self.request(request).await?)
    }

    /// Like [`request_ok`](Self::request_ok) with an explicit timeout
    pub async fn request_ok_within(&mut self, request: HostRequest, wait: Duration) -> Result<(), ModuleError> {
        let kind = request.kind();
        expect_ok(kind, self.request_within(request, wait).await?)
    }

    async fn recv_reply(&mut self, id: CorrelationId, kind: &str) -> Result<ReplyPayload, ModuleError> {
        loop {
            let reply: ModuleReply = self.channel.recv().await?.ok_or_else(|| {
                ModuleError::IpcError(format!("Connection closed while waiting for {} reply", kind))
            })?;

            match reply.id.cmp(&id) {
                Ordering::Equal => {
                    debug!("Received reply for correlation_id={}", id);
                    return Ok(reply.payload);
                }
                Ordering::Less => {
                    debug!("Dropping late reply for correlation_id={}", reply.id);
                }
                Ordering::Greater => {
                    return Err(ModuleError::IpcError(format!(
                        "Correlation ID mismatch: expected {}, got {}",
                        id, reply.id
                    )))
                }
            }
        }
    }

    /// Close the channel, returning the underlying streams
    pub fn into_inner(self) -> (R, W) {
        self.channel.into_inner()
    }

    fn next_correlation_id(&mut self) -> CorrelationId {
        let id = self.next_correlation_id;
        self.next_correlation_id += 1;
        id
    }
}

fn expect_ok(kind: &str, payload: ReplyPayload) -> Result<(), ModuleError> {
    match payload {
        ReplyPayload::Ok => Ok(()),
        ReplyPayload::Error { message } => Err(ModuleError::IpcError(format!(
            "Module rejected {}: {}",
            kind, message
        ))),
        other => Err(ModuleError::IpcError(format!(
            "Unexpected reply to {}: {:?}",
            kind, other
        ))),
    }
}
