// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Concurrency primitives used by every daemon in the fleet: an unbounded
//! blocking queue and a one-shot event latch.

pub mod event;
pub mod queue;

pub use event::Event;
pub use queue::BlockingQueue;
