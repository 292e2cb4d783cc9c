// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Point-to-point message bus used between the query generators, the
//! controller, and the workers.
//!
//! Each direction of a connection carries newline-delimited JSON messages
//! and preserves FIFO ordering. An [`Outlet`] is the client side with an
//! internal outbound queue and capped reconnection; an [`Inlet`] is the
//! listening side that funnels every peer's messages into one sink queue.
//! A message of kind [`MessageKind::Finished`] signals connection teardown.

pub mod error;
pub mod inlet;
pub mod message;
pub mod outlet;

pub use error::Error;
pub use inlet::Inlet;
pub use message::{Message, MessageKind};
pub use outlet::{MAX_CONNECT_RETRIES, Outlet, RETRY_BACKOFF};
