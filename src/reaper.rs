//! Zombie reaper: crash recovery for dispatched tasks.
//!
//! A worker that dies mid-callback leaves its start value on the live-task
//! list with no one to release it. Its shadow key expires after
//! `running_timeout`, and that expiry is the detection signal: `cleanup`
//! scans the live list and migrates every shadowless entry to the retry
//! queue.
//!
//! Driven by an external timer — the engine never spawns its own ticker.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::Keys;
use crate::coord::{CoordOp, Coordinator};
use crate::error::RatchetError;

pub struct ZombieReaper {
    coord: Arc<dyn Coordinator>,
    keys: Keys,
    name: String,
    retry_timeout: Duration,
}

impl ZombieReaper {
    pub fn new(
        coord: Arc<dyn Coordinator>,
        keys: Keys,
        name: String,
        retry_timeout: Duration,
    ) -> Self {
        Self {
            coord,
            keys,
            name,
            retry_timeout,
        }
    }

    /// Scan the live-task list and move every entry whose shadow has
    /// expired to the retry queue.
    ///
    /// Safe to run concurrently from multiple instances: removal is an
    /// exact-match `Remove` of count one, so a zombie processed twice loses
    /// at most one list entry and gains at most one duplicate retry entry —
    /// and retry dispatch is idempotent at the business level by contract.
    pub async fn cleanup(&self) -> Result<(), RatchetError> {
        let entries = self
            .coord
            .list_range(&self.keys.live)
            .await
            .map_err(RatchetError::Coordinator)?;

        for encoded in entries {
            let shadow = self.keys.shadow(&encoded);
            let healthy = self
                .coord
                .exists(&shadow)
                .await
                .map_err(RatchetError::Coordinator)?;
            if healthy {
                continue;
            }

            warn!(
                name = %self.name,
                start = %encoded,
                "task shadow expired, moving to retry queue"
            );
            self.coord
                .batch(vec![
                    CoordOp::Remove {
                        key: self.keys.live.clone(),
                        value: encoded.clone(),
                    },
                    CoordOp::Push {
                        key: self.keys.retry.clone(),
                        value: encoded,
                    },
                    CoordOp::Expire {
                        key: self.keys.retry.clone(),
                        ttl: self.retry_timeout,
                    },
                ])
                .await
                .map_err(RatchetError::Coordinator)?;
        }

        Ok(())
    }
}
