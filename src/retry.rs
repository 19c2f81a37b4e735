//! Retry queue: FIFO list of failed start values.
//!
//! `consume` drains this queue before claiming fresh intervals, so a failed
//! interval is replayed ahead of new work. Retention is bounded by the
//! queue key's TTL — entries that sit longer than `retry_timeout` are
//! dropped wholesale, and workers tolerate at-most-once retry.

use std::sync::Arc;
use std::time::Duration;

use crate::coord::{CoordOp, Coordinator};
use crate::error::RatchetError;

pub struct RetryQueue {
    coord: Arc<dyn Coordinator>,
    key: String,
    retry_timeout: Duration,
}

impl RetryQueue {
    pub fn new(coord: Arc<dyn Coordinator>, key: String, retry_timeout: Duration) -> Self {
        Self {
            coord,
            key,
            retry_timeout,
        }
    }

    /// Enqueue a failed start and refresh the queue's TTL, in one round
    /// trip.
    pub async fn fail(&self, encoded: &str) -> Result<(), RatchetError> {
        self.coord
            .batch(vec![
                CoordOp::Push {
                    key: self.key.clone(),
                    value: encoded.to_string(),
                },
                CoordOp::Expire {
                    key: self.key.clone(),
                    ttl: self.retry_timeout,
                },
            ])
            .await
            .map_err(RatchetError::Coordinator)
    }

    /// Dequeue the oldest failed start, if any.
    pub async fn failed(&self) -> Result<Option<String>, RatchetError> {
        self.coord
            .list_pop(&self.key)
            .await
            .map_err(RatchetError::Coordinator)
    }

    pub async fn len(&self) -> Result<usize, RatchetError> {
        self.coord
            .list_len(&self.key)
            .await
            .map_err(RatchetError::Coordinator)
    }
}
