//! Unlock progress tracking.
//!
//! Contributions far from the threshold are written blind (cache path).
//! Within `amount × atomic_threshold_multiplier` of the cached cost, the total
//! is re-read from the store after the write (atomic path) and the unlock is
//! triggered from the authoritative value.
//!
//! The store rejects writes to a row an unlock has already completed; such a
//! contribution is re-applied once to the new active row.
//!
//! Triggers go through a capacity-1 semaphore with a non-blocking acquire.
//! A trigger that finds the slot taken is dropped: the execution in flight,
//! or the next contribution, re-evaluates the same condition.

use crate::error::{Error, Result};
use crate::model::{Unlock, UnlockProgress, UnlockSource};
use crate::service::ProgressionService;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl ProgressionService {
    /// The accumulating progress row, if one exists.
    pub async fn get_active_unlock_progress(&self) -> Result<Option<UnlockProgress>> {
        self.store().active_progress().await
    }

    pub(crate) async fn ensure_active_progress(&self) -> Result<UnlockProgress> {
        match self.store().active_progress().await? {
            Some(progress) => Ok(progress),
            None => {
                let progress = self.store().create_progress().await?;
                info!(progress_id = %progress.id, "created unlock progress");
                Ok(progress)
            }
        }
    }

    /// Add contribution points toward the current target.
    pub async fn add_contribution(&self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let amount = self.apply_contribution_boost(amount).await;
        match self.contribute_to_active(amount).await {
            Err(Error::StaleProgress(stale)) => {
                // An unlock completed the row between our read and write
                debug!(progress_id = %stale, amount, "progress completed mid-contribution, retrying");
                self.contribute_to_active(amount).await
            }
            result => result,
        }
    }

    async fn contribute_to_active(&self, amount: u64) -> Result<()> {
        let progress = self.ensure_active_progress().await?;
        let cached = self
            .caches()
            .target
            .get()
            .filter(|t| t.progress_id == progress.id);
        let Some(target) = cached else {
            self.store().add_contribution(progress.id, amount).await?;
            debug!(
                amount,
                total = progress.contributions_accumulated + amount,
                target = "not_set",
                "contribution recorded"
            );
            return Ok(());
        };

        let projected = progress.contributions_accumulated.saturating_add(amount);
        let estimated_remaining = target.cost as i128 - projected as i128;
        let window = amount as i128 * self.config().atomic_threshold_multiplier as i128;

        self.store().add_contribution(progress.id, amount).await?;

        if estimated_remaining > window {
            debug!(amount, estimated_total = projected, cost = target.cost, "contribution recorded");
            return Ok(());
        }

        let Some(current) = self.store().active_progress().await? else {
            return Ok(());
        };
        if current.id != progress.id {
            debug!(progress_id = %progress.id, "progress rolled forward during contribution");
            return Ok(());
        }
        debug!(
            amount,
            total = current.contributions_accumulated,
            cost = target.cost,
            "contribution recorded near threshold"
        );
        if current.contributions_accumulated >= target.cost {
            self.trigger_unlock_check();
        }
        Ok(())
    }

    async fn apply_contribution_boost(&self, amount: u64) -> u64 {
        let key = &self.config().contribution_boost_key;
        match self.is_feature_unlocked(key).await {
            Ok(true) => self.config().boosted(amount),
            Ok(false) => amount,
            Err(e) => {
                warn!(error = %e, "contribution boost check failed, using raw amount");
                amount
            }
        }
    }

    /// Start a background unlock check unless one is already in flight.
    ///
    /// Returns whether a check was started.
    pub(crate) fn trigger_unlock_check(&self) -> bool {
        let Ok(permit) = Arc::clone(self.unlock_slot()).try_acquire_owned() else {
            debug!("unlock check already in flight, trigger dropped");
            return false;
        };
        let service = self.clone();
        self.spawn_task("check_and_unlock_node", async move {
            let _permit = permit;
            match service.check_and_unlock_held().await {
                Ok(Some(unlock)) => {
                    debug!(node_id = %unlock.node_id, level = unlock.level, "background unlock complete")
                }
                Ok(None) => debug!("background unlock check found nothing to unlock"),
                Err(e) => error!(error = %e, "background unlock check failed"),
            }
        })
    }

    /// Unlock the current target if its cost has been met.
    ///
    /// Safe to call from a scheduler at any time; it waits for any unlock
    /// already in flight.
    pub async fn check_and_unlock_node(&self) -> Result<Option<Unlock>> {
        let _permit = self
            .unlock_slot()
            .acquire()
            .await
            .map_err(|_| Error::Store("unlock semaphore closed".into()))?;
        self.check_and_unlock_held().await
    }

    /// Body of the unlock check; the caller holds the unlock slot.
    async fn check_and_unlock_held(&self) -> Result<Option<Unlock>> {
        let Some(progress) = self.store().active_progress().await? else {
            self.store().create_progress().await?;
            return Ok(None);
        };
        let Some((node_id, level)) = progress.target() else {
            return Ok(None);
        };
        let node = self
            .store()
            .node(node_id)
            .await?
            .ok_or_else(|| Error::Store(format!("target node {} does not exist", node_id)))?;

        if progress.contributions_accumulated < node.unlock_cost {
            return Ok(None);
        }

        let unlock = self
            .perform_node_unlock(&progress, &node, level, UnlockSource::Vote)
            .await?;
        Ok(Some(unlock))
    }
}
