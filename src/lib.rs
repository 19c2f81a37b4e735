//! # Ratchet
//!
//! A distributed cursor-indexing scheduler: advance one or more named
//! monotonic cursors across a cluster of worker processes so that each
//! half-open interval `[start, ended)` is dispatched exactly once (modulo
//! explicit retry), under a global concurrency cap, surviving worker
//! crashes.
//!
//! ## Architecture
//!
//! ```text
//! caller tick
//!     │
//!     ▼ consume()
//! admission ── cap reached ──► Backpressured
//!     │
//!     ├─► retry queue ── LPOP ──► replay failed start
//!     │
//!     └─► atomic claim ─────────┐
//!              │                │ under cursor lock (~1s TTL):
//!              │                │ read → latest? → step → write → epoch
//!              ▼                │
//!         occupy(start) ◄───────┘
//!              │  live list RPUSH + shadow SET EX (one round trip)
//!              ▼
//!         callback(start, ended, epoch)
//!              │
//!     ok ──► release ──► done
//!     err ─► epoch match? ──► retry queue (else drop) ──► release ──► rethrow
//!
//! cleanup() ──► live entries without a shadow ──► retry queue
//! rollback(t) ─► hook → cursor = t → wipe queues/shadows → epoch += 1
//! ```
//!
//! ## Key Invariants
//!
//! 1. **The cursor only moves under its lock** — concurrent `atomic()`
//!    callers each receive a distinct interval
//! 2. **Pre-claim** — the cursor advances before the callback runs, so the
//!    lock region is coordinator round trips only, never user code
//! 3. **Every live-task entry has a shadow or is a zombie** — shadow TTL
//!    expiry is the crash-detection signal, and `cleanup` migrates the
//!    orphaned start to the retry queue
//! 4. **Occupy/release are balanced** — release runs on every exit path of
//!    `consume`, and its failures never mask the callback's error
//! 5. **Epochs invalidate, never cancel** — a rollback increments the epoch
//!    and in-flight callbacks from the old timeline drop their results
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ratchet::{Indexer, RedisCoordinator};
//!
//! let coord = Arc::new(RedisCoordinator::connect("redis://localhost:6379").await?);
//!
//! let blocks = Indexer::<u64>::builder("blocks")
//!     .initial(0)
//!     .step_fn(|height| height + 100)
//!     .latest_fn(|height| *height >= chain_tip)
//!     .concurrency(8)
//!     .coordinator(coord)
//!     .build()?;
//!
//! // Driven by whatever cadence the caller chooses:
//! blocks
//!     .consume(|start, ended, _epoch| async move {
//!         index_blocks(start..ended).await
//!     })
//!     .await?;
//! ```
//!
//! ## What This Is Not
//!
//! Ratchet is **not** a job queue, a broker, a storage driver, or a
//! scheduler — callers decide when to tick `consume`, what to do with each
//! interval, and where results land. It **is** the coordination primitive
//! underneath: claim, account, reap, retry, roll back.

mod codec;
mod concurrency;
mod config;
mod coord;
mod cursor;
mod driver;
mod epoch;
mod error;
mod indexer;
mod registry;
mod reaper;
mod retry;
mod store;

// End-to-end scenarios (test-only)
#[cfg(test)]
mod scenario_tests;

// Re-export error types
pub use crate::error::RatchetError;

// Re-export configuration
pub use crate::config::{IndexerConfig, Keys};

// Re-export the engine (primary entry point)
pub use crate::indexer::{Claim, ConsumeOptions, ConsumeOutcome, Indexer, IndexerBuilder};

// Re-export user-hook types
pub use crate::driver::{CursorDriver, FnDriver};

// Re-export backend capabilities and implementations
pub use crate::coord::memory::MemoryCoordinator;
pub use crate::coord::redis::RedisCoordinator;
pub use crate::coord::{CoordOp, Coordinator};
pub use crate::store::{CursorStore, MemoryCursorStore};

// Re-export the registry
pub use crate::registry::IndexerRegistry;

// Re-export commonly used external types
pub use async_trait::async_trait;
