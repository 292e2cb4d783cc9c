// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Listening side of the bus.

use crate::error::Error;
use crate::message::{Message, MessageKind};
use futures::StreamExt;
use gpufleet_channel::BlockingQueue;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

/// Accepts peer connections and funnels their messages into a sink queue.
///
/// Each connection is read by its own task, so ordering is FIFO per peer.
/// A peer that sends [`MessageKind::Finished`] is no longer read; the
/// `FINISHED` message itself is still delivered to the sink.
pub struct Inlet {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Inlet {
    /// Binds `host:port` and starts accepting connections.
    pub async fn bind(host: &str, port: u16, sink: BlockingQueue<Message>) -> Result<Self, Error> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind { addr, source })?;
        debug!(%local_addr, "inlet listening");

        let accept_task = tokio::spawn(accept_loop(listener, sink));
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// The address the inlet is actually bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Inlet {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, sink: BlockingQueue<Message>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "peer connected");
                let _ = tokio::spawn(read_connection(stream, peer, sink.clone()));
            }
            Err(error) => warn!(%error, "accept failed"),
        }
    }
}

async fn read_connection(stream: TcpStream, peer: SocketAddr, sink: BlockingQueue<Message>) {
    let mut frames = Framed::new(stream, LinesCodec::new());
    while let Some(next) = frames.next().await {
        let line = match next {
            Ok(line) => line,
            Err(error) => {
                warn!(%peer, %error, "read failed, dropping connection");
                break;
            }
        };
        match Message::decode(&line) {
            Ok(message) => {
                let finished = message.kind == MessageKind::Finished;
                sink.push(message);
                if finished {
                    break;
                }
            }
            Err(error) => warn!(%peer, %error, "dropping undecodable message"),
        }
    }
    debug!(%peer, "peer disconnected");
}
