//! Post-unlock transition.
//!
//! Runs in the background after every unlock:
//! 1. Resolve the next target: the open parallel vote (frozen sessions are
//!    resumed first), else the winner of a vote completed since the last
//!    target was chosen, else a random available node.
//! 2. Target it behind a placeholder session and announce the finished cycle.
//! 3. Open the next parallel vote over what remains (2+ candidates), or
//!    announce the single remaining candidate.

use crate::error::Result;
use crate::events::{OptionSummary, ProgressionEvent};
use crate::model::{Node, SessionId, SessionStatus};
use crate::resolver::TreeSnapshot;
use crate::service::ProgressionService;
use crate::voting::random_index;
use tracing::{debug, error, info};

impl ProgressionService {
    pub(crate) fn spawn_transition(&self, unlocked: Node, selecting_session: Option<SessionId>) {
        let service = self.clone();
        self.spawn_task("post_unlock_transition", async move {
            if let Err(e) = service
                .handle_post_unlock_transition(&unlocked, selecting_session)
                .await
            {
                error!(node_key = %unlocked.key, error = %e, "post-unlock transition failed");
            }
        });
    }

    async fn handle_post_unlock_transition(
        &self,
        unlocked: &Node,
        selecting_session: Option<SessionId>,
    ) -> Result<()> {
        let _sessions = self.lock_sessions().await;
        let snapshot = self.snapshot().await?;

        let Some((next, level)) = self.resolve_next_target(&snapshot, selecting_session).await?
        else {
            info!(last_unlock = %unlocked.key, "every node is unlocked");
            self.publish(ProgressionEvent::AllUnlocked {
                message: format!("{} was the last node to unlock", unlocked.display_name),
            });
            return Ok(());
        };

        let progress = self.ensure_active_progress().await?;
        let placeholder = self.create_placeholder_session().await?;
        self.assign_target(progress.id, &next, level, placeholder, false)
            .await?;
        self.publish(ProgressionEvent::CycleCompleted {
            node: unlocked.clone(),
        });

        let remaining: Vec<(Node, u32)> = snapshot
            .available_with_future_target(Some(next.id))
            .into_iter()
            .filter(|n| n.id != next.id)
            .filter_map(|n| Some((n.clone(), snapshot.next_target_level(n)?)))
            .collect();
        let previous_label = Some(unlocked.display_name.clone());

        match remaining.len() {
            0 => debug!(next = %next.key, "no candidates left for a parallel vote"),
            1 => {
                let (node, level) = &remaining[0];
                self.publish(ProgressionEvent::VotingStarted {
                    session_id: None,
                    options: vec![OptionSummary::from_node(1, node, *level)],
                    previous_unlock: previous_label,
                    auto_selected: true,
                });
            }
            _ => {
                self.open_voting_session(remaining, previous_label).await?;
            }
        }
        Ok(())
    }

    /// Next (node, level) to accumulate toward, or None when nothing is left.
    async fn resolve_next_target(
        &self,
        snapshot: &TreeSnapshot,
        selecting_session: Option<SessionId>,
    ) -> Result<Option<(Node, u32)>> {
        if let Some(session) = self.store().open_session().await? {
            if let Some(winner) = self.resolve_session(&session).await? {
                match snapshot.target_for(winner.node_id) {
                    Some((node, level)) => return Ok(Some((node.clone(), level))),
                    None => debug!(node_key = %winner.node.key, "vote winner no longer available"),
                }
            }
        } else if let Some(session) = self.store().latest_session().await? {
            // A vote ended early while the previous target was still accumulating
            let fresh = session.status == SessionStatus::Completed
                && Some(session.id) != selecting_session;
            if let Some(winner) = session.winning_option().filter(|_| fresh) {
                if let Some((node, level)) = snapshot.target_for(winner.node_id) {
                    return Ok(Some((node.clone(), level)));
                }
            }
        }

        let available = snapshot.available();
        if available.is_empty() {
            return Ok(None);
        }
        let node = available[random_index(available.len())];
        Ok(snapshot
            .next_target_level(node)
            .map(|level| (node.clone(), level)))
    }
}
