// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Client side of the bus: an identified endpoint with an outbound queue.

use crate::error::Error;
use crate::message::{Message, MessageKind};
use futures::SinkExt;
use gpufleet_channel::BlockingQueue;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

/// Maximum connection attempts before the outbound queue stalls.
pub const MAX_CONNECT_RETRIES: u32 = 20;

/// Pause between connection attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Outgoing endpoint towards one remote process.
///
/// `push` enqueues without blocking; a writer task drains the queue in FIFO
/// order. Lost connections are re-established without dropping the message
/// that was in flight. Once the retry budget is exhausted the queue stalls
/// and the failure is logged; there is no higher-level recovery.
pub struct Outlet {
    id: u32,
    remote_addr: String,
    queue: BlockingQueue<Message>,
    writer_task: JoinHandle<()>,
}

impl Outlet {
    /// Creates the endpoint and starts its writer task.
    ///
    /// Connecting happens in the background, so messages may be queued
    /// before the remote end is reachable.
    #[must_use]
    pub fn connect(id: u32, remote_host: &str, remote_port: u16) -> Self {
        let remote_addr = format!("{remote_host}:{remote_port}");
        let queue = BlockingQueue::new();
        let writer_task = tokio::spawn(write_loop(id, remote_addr.clone(), queue.clone()));
        Self {
            id,
            remote_addr,
            queue,
            writer_task,
        }
    }

    /// Enqueues a message for delivery.
    pub fn push(&self, message: Message) {
        self.queue.push(message);
    }

    /// Enqueues the `FINISHED` teardown message; the writer task exits after
    /// sending it.
    pub fn finish(&self) {
        self.push(Message::new(MessageKind::Finished));
    }

    /// Identifier of this endpoint, assigned by the owning engine.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The remote `host:port` this endpoint delivers to.
    #[must_use]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

impl Drop for Outlet {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

async fn write_loop(id: u32, addr: String, queue: BlockingQueue<Message>) {
    let mut pending: Option<Message> = None;
    'connection: loop {
        let stream = match connect_with_retry(&addr).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(outlet = id, %addr, %err, "giving up, outbound queue stalls");
                return;
            }
        };
        info!(outlet = id, %addr, "connected");
        let mut frames = Framed::new(stream, LinesCodec::new());

        loop {
            let message = match pending.take() {
                Some(message) => message,
                None => queue.pop().await,
            };
            let line = match message.encode() {
                Ok(line) => line,
                Err(err) => {
                    warn!(outlet = id, %err, "dropping unencodable message");
                    continue;
                }
            };
            if let Err(err) = frames.send(line).await {
                warn!(outlet = id, %err, "send failed, reconnecting");
                pending = Some(message);
                continue 'connection;
            }
            if message.kind == MessageKind::Finished {
                info!(outlet = id, %addr, "connection closed");
                return;
            }
        }
    }
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream, Error> {
    let mut last_error = None;
    for attempt in 0..MAX_CONNECT_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(attempt, %addr, %err, "connect failed");
                last_error = Some(err);
            }
        }
    }
    Err(Error::Connect {
        addr: addr.to_owned(),
        attempts: MAX_CONNECT_RETRIES,
        source: last_error.unwrap_or_else(|| std::io::Error::other("no attempt made")),
    })
}
