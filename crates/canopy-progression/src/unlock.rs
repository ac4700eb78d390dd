//! Unlock execution.

use crate::error::{Error, Result};
use crate::events::ProgressionEvent;
use crate::model::{Node, SessionId, SessionStatus, Unlock, UnlockProgress, UnlockSource};
use crate::service::ProgressionService;
use tracing::{debug, info, warn};

/// Excess carried into the next cycle, capped at `cap`.
pub fn capped_rollover(accumulated: u64, cost: u64, cap: u64) -> u64 {
    accumulated.saturating_sub(cost).min(cap)
}

impl ProgressionService {
    /// Write the unlock for a satisfied progress row and roll forward.
    ///
    /// If rolling the progress forward fails the unlock stands and the
    /// failure is logged; the stale row keeps its target, so the next check
    /// retries the roll-forward.
    pub(crate) async fn perform_node_unlock(
        &self,
        progress: &UnlockProgress,
        node: &Node,
        level: u32,
        source: UnlockSource,
    ) -> Result<Unlock> {
        let unlock = self
            .store()
            .unlock_node(node.id, level, source, progress.contributions_accumulated)
            .await?;
        self.publish(ProgressionEvent::NodeUnlocked {
            node_id: node.id,
            node_key: node.key.clone(),
            level,
            source,
        });
        info!(
            node_key = %node.key,
            level,
            accumulated = progress.contributions_accumulated,
            cost = node.unlock_cost,
            "node unlocked"
        );

        if let Some(session) = progress.voting_session_id {
            self.close_selecting_session(session, node).await;
        }

        let rollover = capped_rollover(
            progress.contributions_accumulated,
            node.unlock_cost,
            self.config().max_rollover,
        );
        let rolled = self.store().complete_progress(progress.id, rollover).await;
        self.caches().target.clear();

        match rolled {
            Ok(next) => {
                debug!(progress_id = %next, rollover, "progress rolled forward");
                self.spawn_transition(node.clone(), progress.voting_session_id);
            }
            Err(e) => {
                warn!(
                    node_key = %node.key,
                    progress_id = %progress.id,
                    error = %e,
                    "node unlocked but progress could not be rolled forward"
                );
            }
        }
        Ok(unlock)
    }

    /// Complete a still-open session that selected this node.
    async fn close_selecting_session(&self, session: SessionId, node: &Node) {
        let result = async {
            let Some(s) = self.store().session(session).await? else {
                return Ok(());
            };
            if s.status == SessionStatus::Completed {
                return Ok(());
            }
            if let Some(option) = s.option_for_node(node.id) {
                self.store().end_session(session, Some(option.id)).await?;
                debug!(session_id = %session, node_key = %node.key, "closed selecting session");
            }
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = result {
            warn!(session_id = %session, error = %e, "failed to close selecting session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rollover_below_cap_is_kept() {
        assert_eq!(capped_rollover(650, 500, 200), 150);
        assert_eq!(capped_rollover(500, 500, 200), 0);
    }

    #[test]
    fn rollover_is_capped() {
        assert_eq!(capped_rollover(10_000, 500, 200), 200);
    }

    #[test]
    fn short_total_rolls_nothing() {
        assert_eq!(capped_rollover(100, 500, 200), 0);
    }

    proptest! {
        #[test]
        fn rollover_never_exceeds_cap_or_excess(acc in 0u64..1_000_000, cost in 0u64..100_000, cap in 0u64..1000) {
            let r = capped_rollover(acc, cost, cap);
            prop_assert!(r <= cap);
            prop_assert!(r <= acc.saturating_sub(cost));
        }
    }
}
