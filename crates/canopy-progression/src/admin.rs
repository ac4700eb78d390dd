//! Operator overrides, resets and boot-time initialization.

use crate::error::{Error, Result};
use crate::events::ProgressionEvent;
use crate::model::{Node, NodeId, ResetRecord, SessionStatus, Unlock, UnlockSource};
use crate::service::ProgressionService;
use crate::voting::find_winning_option;
use chrono::Utc;
use tracing::{debug, error, info, warn};

impl ProgressionService {
    /// Unlock `key` at `level` regardless of contributions.
    pub async fn admin_unlock(&self, key: &str, level: u32) -> Result<Unlock> {
        let node = self.node_for_admin(key).await?;
        check_level(&node, level)?;
        self.admin_unlock_node(&node, level).await
    }

    async fn admin_unlock_node(&self, node: &Node, level: u32) -> Result<Unlock> {
        let score = self.engagement_score_or_zero().await;
        let unlock = self
            .store()
            .unlock_node(node.id, level, UnlockSource::Admin, score)
            .await?;
        self.publish(ProgressionEvent::NodeUnlocked {
            node_id: node.id,
            node_key: node.key.clone(),
            level,
            source: UnlockSource::Admin,
        });
        info!(node_key = %node.key, level, "admin unlocked node");
        Ok(unlock)
    }

    /// Unlock every node at its max level. Returns how many succeeded.
    pub async fn admin_unlock_all(&self) -> Result<usize> {
        let nodes = self.store().nodes().await?;
        if nodes.is_empty() {
            return Err(Error::NodeNotFound("no nodes configured".into()));
        }
        let mut unlocked = 0;
        for node in &nodes {
            match self.admin_unlock_node(node, node.max_level).await {
                Ok(_) => unlocked += 1,
                Err(e) => warn!(node_key = %node.key, error = %e, "failed to unlock node"),
            }
        }
        info!(total = nodes.len(), unlocked, "admin unlocked all nodes");
        Ok(unlocked)
    }

    /// Remove an unlock. Any progress aimed at the node loses its target.
    ///
    /// Returns whether an unlock record existed.
    pub async fn admin_relock(&self, key: &str, level: u32) -> Result<bool> {
        let node = self.node_for_admin(key).await?;
        check_level(&node, level)?;

        let existed = self.store().relock_node(node.id, level).await?;
        let targeted = self
            .store()
            .active_progress()
            .await?
            .is_some_and(|p| p.node_id == Some(node.id));
        if targeted {
            self.store().clear_progress_target(node.id).await?;
            self.caches().target.clear();
        }
        self.publish(ProgressionEvent::NodeRelocked {
            node_id: node.id,
            node_key: node.key.clone(),
            level,
        });
        info!(node_key = %node.key, level, existed, cleared_target = targeted, "admin relocked node");
        Ok(existed)
    }

    /// Wipe unlocks, sessions, votes and progress, keeping an audit record.
    ///
    /// Auto-unlock nodes are unlocked again afterwards.
    pub async fn reset_progression_tree(
        &self,
        reset_by: &str,
        reason: &str,
        preserve_user_data: bool,
    ) -> Result<ResetRecord> {
        let _sessions = self.lock_sessions().await;
        let _slot = self
            .unlock_slot()
            .acquire()
            .await
            .map_err(|_| Error::Store("unlock semaphore closed".into()))?;

        let record = ResetRecord {
            reset_by: reset_by.to_string(),
            reason: reason.to_string(),
            nodes_reset: self.store().unlocks().await?.len(),
            engagement_score_at_reset: self.store().engagement_score().await?,
            reset_at: Utc::now(),
        };
        let removed = self
            .store()
            .reset_tree(record.clone(), preserve_user_data)
            .await?;

        let mut restored = 0;
        for node in self.store().nodes().await?.iter().filter(|n| n.auto_unlock) {
            self.store()
                .unlock_node(node.id, 1, UnlockSource::Auto, 0)
                .await?;
            restored += 1;
        }
        self.caches().clear_all();
        info!(
            reset_by,
            reason,
            removed,
            restored,
            preserve_user_data,
            "progression tree reset"
        );
        Ok(record)
    }

    /// End the open vote and unlock its winner immediately.
    ///
    /// The current progress row is retargeted at the winner and completed
    /// without rollover; the next cycle starts in the background.
    pub async fn force_instant_unlock(&self) -> Result<Unlock> {
        let sessions = self.lock_sessions().await;
        let session = self
            .store()
            .open_session()
            .await?
            .filter(|s| s.status == SessionStatus::Voting)
            .ok_or(Error::NoActiveSession)?;
        let winner = find_winning_option(&session.options)
            .cloned()
            .ok_or(Error::NoActiveSession)?;
        self.store().end_session(session.id, Some(winner.id)).await?;

        let slot = self
            .unlock_slot()
            .acquire()
            .await
            .map_err(|_| Error::Store("unlock semaphore closed".into()))?;

        let progress = self.ensure_active_progress().await?;
        self.store()
            .set_progress_target(progress.id, winner.node_id, winner.target_level, session.id)
            .await?;

        let score = self.engagement_score_or_zero().await;
        let unlock = self
            .store()
            .unlock_node(winner.node_id, winner.target_level, UnlockSource::InstantOverride, score)
            .await?;
        self.publish(ProgressionEvent::NodeUnlocked {
            node_id: winner.node_id,
            node_key: winner.node.key.clone(),
            level: winner.target_level,
            source: UnlockSource::InstantOverride,
        });
        info!(
            node_key = %winner.node.key,
            level = winner.target_level,
            votes = winner.vote_count,
            "instant unlock"
        );

        let rolled = self.store().complete_progress(progress.id, 0).await;
        self.caches().target.clear();
        drop(slot);
        drop(sessions);

        match rolled {
            Ok(_) => self.spawn_transition(winner.node, Some(session.id)),
            Err(e) => error!(
                node_key = %winner.node.key,
                error = %e,
                "node unlocked but progress could not be rolled forward"
            ),
        }
        Ok(unlock)
    }

    /// Restore runtime state at boot.
    ///
    /// With a target already set only the cost cache is warmed. Otherwise a
    /// random available node is targeted and the parallel vote opened.
    pub async fn initialize_progression_state(&self) -> Result<()> {
        let _sessions = self.lock_sessions().await;
        let progress = self.ensure_active_progress().await?;

        if let Some(node_id) = progress.node_id {
            if let Some(node) = self.store().node(node_id).await? {
                self.caches().target.set(node.unlock_cost, progress.id);
                info!(node_key = %node.key, accumulated = progress.contributions_accumulated, "progression state: target already set");
            }
            return Ok(());
        }

        let snapshot = self.snapshot().await?;
        if snapshot.available().is_empty() {
            info!("progression state: every node is unlocked");
            self.publish(ProgressionEvent::AllUnlocked {
                message: "All progression nodes have been unlocked".into(),
            });
            return Ok(());
        }

        let node = self.set_initial_target(&progress, &snapshot).await?;
        info!(node_key = %node.key, "progression state: initial target set");
        match self.start_voting_locked(None).await {
            Ok(()) => Ok(()),
            Err(Error::NoNodesAvailable) | Err(Error::SessionAlreadyActive) => Ok(()),
            Err(e) => {
                warn!(error = %e, "failed to open parallel vote");
                Ok(())
            }
        }
    }

    /// Run the unlock check; with nothing unlocked and no open session,
    /// start one in the background.
    pub async fn check_and_unlock_criteria(&self) -> Result<Option<Unlock>> {
        if let Some(unlock) = self.check_and_unlock_node().await? {
            return Ok(Some(unlock));
        }
        if self.store().open_session().await?.is_none() {
            self.spawn_voting_start(None);
        }
        Ok(None)
    }

    pub(crate) fn spawn_voting_start(&self, previous_unlock: Option<NodeId>) -> bool {
        let service = self.clone();
        self.spawn_task("start_voting_session", async move {
            match service.start_voting_session(previous_unlock).await {
                Ok(()) => {}
                Err(Error::NoNodesAvailable) | Err(Error::SessionAlreadyActive) => {
                    debug!("background voting start skipped")
                }
                Err(e) => error!(error = %e, "failed to start voting session"),
            }
        })
    }

    async fn node_for_admin(&self, key: &str) -> Result<Node> {
        self.store()
            .node_by_key(key)
            .await?
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    async fn engagement_score_or_zero(&self) -> u64 {
        self.store().engagement_score().await.unwrap_or_else(|e| {
            warn!(error = %e, "engagement score unavailable, recording 0");
            0
        })
    }
}

fn check_level(node: &Node, level: u32) -> Result<()> {
    if level == 0 {
        return Err(Error::InvalidLevel {
            key: node.key.clone(),
            level,
        });
    }
    if level > node.max_level {
        return Err(Error::MaxLevelExceeded {
            key: node.key.clone(),
            level,
            max_level: node.max_level,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::node;

    #[test]
    fn levels_outside_range_are_rejected() {
        let n = node(1, "economy", 0, 3);
        assert!(check_level(&n, 1).is_ok());
        assert!(check_level(&n, 3).is_ok());
        assert!(matches!(check_level(&n, 0), Err(Error::InvalidLevel { level: 0, .. })));
        assert!(matches!(
            check_level(&n, 4),
            Err(Error::MaxLevelExceeded { level: 4, max_level: 3, .. })
        ));
    }
}
