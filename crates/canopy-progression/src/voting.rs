//! Voting session state machine.
//!
//! ```text
//! voting ──freeze──▶ frozen
//!   ▲                  │
//!   └─────resume───────┘
//!   │
//!   └──end──▶ completed (terminal)
//! ```
//!
//! Voting for the next target runs in parallel with accumulation toward the
//! current one. With a single candidate no public session is opened: the node
//! is selected directly.

use crate::error::{Error, Result};
use crate::events::{OptionSummary, ProgressionEvent};
use crate::identity::resolve_or_register;
use crate::model::{Node, NodeId, ProgressId, SessionId, SessionStatus, UnlockProgress, VotingOption, VotingSession};
use crate::resolver::TreeSnapshot;
use crate::service::ProgressionService;
use rand::rngs::OsRng;
use rand::Rng;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Pick the winner of a session.
///
/// Highest vote count wins. Ties go to the option that reached its count
/// first. With no votes at all the winner is drawn uniformly at random.
pub fn find_winning_option(options: &[VotingOption]) -> Option<&VotingOption> {
    if options.is_empty() {
        return None;
    }
    if options.iter().all(|o| o.vote_count == 0) {
        return options.get(random_index(options.len()));
    }
    options
        .iter()
        .reduce(|best, option| if beats(option, best) { option } else { best })
}

fn beats(challenger: &VotingOption, incumbent: &VotingOption) -> bool {
    match challenger.vote_count.cmp(&incumbent.vote_count) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match (challenger.last_highest_vote_at, incumbent.last_highest_vote_at) {
            (Some(c), Some(i)) => c < i,
            (Some(_), None) => true,
            _ => false,
        },
    }
}

/// Uniform index in `0..len` from the OS random source.
pub(crate) fn random_index(len: usize) -> usize {
    OsRng.gen_range(0..len)
}

/// Shuffle candidates (Fisher–Yates), keep `max`, then order by key.
pub(crate) fn select_candidates(mut candidates: Vec<(Node, u32)>, max: usize) -> Vec<(Node, u32)> {
    for i in (1..candidates.len()).rev() {
        let j = OsRng.gen_range(0..=i);
        candidates.swap(i, j);
    }
    candidates.truncate(max);
    candidates.sort_by(|a, b| a.0.key.cmp(&b.0.key));
    candidates
}

impl ProgressionService {
    /// The voting or frozen session, if any.
    pub async fn get_active_voting_session(&self) -> Result<Option<VotingSession>> {
        self.store().open_session().await
    }

    /// The latest session in any status.
    pub async fn get_most_recent_voting_session(&self) -> Result<Option<VotingSession>> {
        self.store().latest_session().await
    }

    /// Open the vote for the next target.
    ///
    /// Allowed while another node is accumulating; the node already targeted
    /// is never a candidate.
    pub async fn start_voting_session(&self, previous_unlock: Option<NodeId>) -> Result<()> {
        let _sessions = self.lock_sessions().await;
        self.start_voting_locked(previous_unlock).await
    }

    pub(crate) async fn start_voting_locked(&self, previous_unlock: Option<NodeId>) -> Result<()> {
        if self.store().open_session().await?.is_some() {
            return Err(Error::SessionAlreadyActive);
        }

        let progress = self.ensure_active_progress().await?;
        let snapshot = self.snapshot().await?;
        let current_target = progress.node_id;

        let candidates: Vec<(Node, u32)> = snapshot
            .available_with_future_target(current_target)
            .into_iter()
            .filter(|n| Some(n.id) != current_target)
            .filter_map(|n| Some((n.clone(), snapshot.next_target_level(n)?)))
            .collect();

        let previous = previous_unlock.and_then(|id| snapshot.node(id)).cloned();
        if let Some(node) = &previous {
            self.publish(ProgressionEvent::CycleCompleted { node: node.clone() });
        }
        let previous_label = previous.map(|n| n.display_name);

        match candidates.len() {
            0 => Err(Error::NoNodesAvailable),
            1 => {
                let (node, level) = &candidates[0];
                if progress.node_id.is_some() {
                    // Already accumulating; the lone candidate becomes the next target after this unlock
                    self.announce_single_candidate(node, *level, previous_label);
                    Ok(())
                } else {
                    self.auto_select_target(&progress, node, *level, previous_label)
                        .await
                }
            }
            _ => {
                self.open_voting_session(candidates, previous_label).await?;
                Ok(())
            }
        }
    }

    /// Create a public session over up to `max_voting_options` candidates.
    pub(crate) async fn open_voting_session(
        &self,
        candidates: Vec<(Node, u32)>,
        previous_label: Option<String>,
    ) -> Result<SessionId> {
        let selected = select_candidates(candidates, self.config().max_voting_options);
        let session = self.store().create_session().await?;
        for (node, level) in &selected {
            self.store().add_option(session, node.id, *level).await?;
        }

        let options = selected
            .iter()
            .enumerate()
            .map(|(i, (node, level))| OptionSummary::from_node(i + 1, node, *level))
            .collect::<Vec<_>>();
        info!(
            session_id = %session,
            options = ?options.iter().map(|o| o.node_key.as_str()).collect::<Vec<_>>(),
            "voting session started"
        );
        self.publish(ProgressionEvent::VotingStarted {
            session_id: Some(session),
            options,
            previous_unlock: previous_label,
            auto_selected: false,
        });
        Ok(session)
    }

    fn announce_single_candidate(&self, node: &Node, level: u32, previous_label: Option<String>) {
        info!(node_key = %node.key, "single candidate, no public vote");
        self.publish(ProgressionEvent::VotingStarted {
            session_id: None,
            options: vec![OptionSummary::from_node(1, node, level)],
            previous_unlock: previous_label,
            auto_selected: true,
        });
    }

    /// Target the only candidate directly.
    ///
    /// A single-option session backs the target and is completed at once, so
    /// it is never open for votes.
    async fn auto_select_target(
        &self,
        progress: &UnlockProgress,
        node: &Node,
        level: u32,
        previous_label: Option<String>,
    ) -> Result<()> {
        let session = self.store().create_session().await?;
        let option = self.store().add_option(session, node.id, level).await?;
        self.store().end_session(session, Some(option)).await?;

        self.assign_target(progress.id, node, level, session, true).await?;
        self.announce_single_candidate(node, level, previous_label);
        Ok(())
    }

    /// Point the progress row at a node, cache its cost and announce it.
    ///
    /// A zero-cost target is unlocked without waiting for contributions.
    pub(crate) async fn assign_target(
        &self,
        progress_id: ProgressId,
        node: &Node,
        level: u32,
        session: SessionId,
        auto_selected: bool,
    ) -> Result<()> {
        self.store()
            .set_progress_target(progress_id, node.id, level, session)
            .await?;
        self.caches().target.set(node.unlock_cost, progress_id);

        info!(
            node_key = %node.key,
            target_level = level,
            cost = node.unlock_cost,
            auto_selected,
            "unlock target set"
        );
        self.publish(ProgressionEvent::TargetSet {
            node_key: node.key.clone(),
            target_level: level,
            auto_selected,
            session_id: session,
        });

        if node.unlock_cost == 0 {
            self.trigger_unlock_check();
        }
        Ok(())
    }

    /// A completed session with no options and no winner.
    pub(crate) async fn create_placeholder_session(&self) -> Result<SessionId> {
        let session = self.store().create_session().await?;
        self.store().end_session(session, None).await?;
        Ok(session)
    }

    /// Cast a vote for the option at 1-based `option_index`.
    ///
    /// Unknown users are registered under `username`. Voting awards the
    /// configured vote metric.
    pub async fn vote_for_unlock(
        &self,
        platform: &str,
        platform_id: &str,
        username: &str,
        option_index: usize,
    ) -> Result<()> {
        let user_id = resolve_or_register(self.identity(), platform, platform_id, username).await?;

        let session = match self.store().open_session().await? {
            Some(s) if s.status == SessionStatus::Voting => s,
            _ => return Err(Error::NoActiveSession),
        };
        let count = session.options.len();
        if option_index == 0 || option_index > count {
            return Err(Error::InvalidOption {
                index: option_index,
                count,
            });
        }
        let option = &session.options[option_index - 1];

        self.store().record_vote(&user_id, session.id, option.id).await?;
        info!(
            user_id = %user_id,
            session_id = %session.id,
            node_key = %option.node.key,
            "vote recorded"
        );

        let metric = self.config().vote_metric.clone();
        if let Err(e) = self.record_engagement(&user_id, &metric, 1).await {
            warn!(user_id = %user_id, error = %e, "failed to award vote contribution");
        }
        Ok(())
    }

    /// End the open vote and return the winner.
    ///
    /// The winner becomes the target only when nothing is accumulating yet;
    /// otherwise it is picked up after the current target unlocks.
    pub async fn end_voting(&self) -> Result<VotingOption> {
        let _sessions = self.lock_sessions().await;
        let session = match self.store().open_session().await? {
            Some(s) if s.status == SessionStatus::Voting => s,
            _ => return Err(Error::NoActiveSession),
        };
        self.conclude_session(session).await
    }

    /// Resume if frozen, pick the winner and complete the session.
    pub(crate) async fn resolve_session(&self, session: &VotingSession) -> Result<Option<VotingOption>> {
        if session.status == SessionStatus::Frozen {
            self.store()
                .set_session_status(session.id, SessionStatus::Voting)
                .await?;
            debug!(session_id = %session.id, "resumed frozen session for resolution");
        }
        let winner = find_winning_option(&session.options).cloned();
        self.store()
            .end_session(session.id, winner.as_ref().map(|w| w.id))
            .await?;
        info!(
            session_id = %session.id,
            winner = winner.as_ref().map(|w| w.node.key.as_str()).unwrap_or("none"),
            votes = winner.as_ref().map(|w| w.vote_count).unwrap_or(0),
            "voting session ended"
        );
        Ok(winner)
    }

    pub(crate) async fn conclude_session(&self, session: VotingSession) -> Result<VotingOption> {
        let winner = self
            .resolve_session(&session)
            .await?
            .ok_or(Error::NoNodesAvailable)?;

        let progress = self.ensure_active_progress().await?;
        if progress.node_id.is_none() {
            let snapshot = self.snapshot().await?;
            let level = snapshot
                .node(winner.node_id)
                .and_then(|n| snapshot.next_target_level(n))
                .unwrap_or(winner.target_level);
            self.assign_target(progress.id, &winner.node, level, session.id, false)
                .await?;
        }
        Ok(winner)
    }

    /// Freeze the open vote.
    pub async fn admin_freeze_voting(&self) -> Result<()> {
        let _sessions = self.lock_sessions().await;
        let session = self
            .store()
            .open_session()
            .await?
            .ok_or(Error::NoActiveSession)?;
        if session.status == SessionStatus::Frozen {
            return Err(Error::SessionAlreadyFrozen);
        }
        self.store()
            .set_session_status(session.id, SessionStatus::Frozen)
            .await?;
        info!(session_id = %session.id, "voting session frozen");
        Ok(())
    }

    /// Resume a frozen vote, or start a new one.
    ///
    /// With nothing targeted yet, a random available node becomes the target
    /// before voting opens for the next one.
    pub async fn admin_start_voting(&self) -> Result<()> {
        let _sessions = self.lock_sessions().await;
        if let Some(session) = self.store().open_session().await? {
            if session.status != SessionStatus::Frozen {
                return Err(Error::SessionAlreadyActive);
            }
            self.store()
                .set_session_status(session.id, SessionStatus::Voting)
                .await?;
            info!(session_id = %session.id, "voting session resumed");
            return Ok(());
        }

        let snapshot = self.snapshot().await?;
        if snapshot.available().is_empty() {
            return Err(Error::NoNodesAvailable);
        }

        let progress = self.ensure_active_progress().await?;
        if progress.node_id.is_some() {
            return self.start_voting_locked(None).await;
        }

        self.set_initial_target(&progress, &snapshot).await?;
        match self.start_voting_locked(None).await {
            // The initial target took the last candidate
            Err(Error::NoNodesAvailable) => Ok(()),
            other => other,
        }
    }

    /// Force-end the open vote, frozen or not.
    pub async fn admin_end_voting(&self) -> Result<VotingOption> {
        let _sessions = self.lock_sessions().await;
        let session = self
            .store()
            .open_session()
            .await?
            .ok_or(Error::NoActiveSession)?;
        self.conclude_session(session).await
    }

    /// Target a random available node behind a placeholder session.
    pub(crate) async fn set_initial_target(
        &self,
        progress: &UnlockProgress,
        snapshot: &TreeSnapshot,
    ) -> Result<Node> {
        let available = snapshot.available();
        if available.is_empty() {
            return Err(Error::NoNodesAvailable);
        }
        let node = available[random_index(available.len())].clone();
        let level = snapshot
            .next_target_level(&node)
            .ok_or(Error::NoNodesAvailable)?;

        let session = self.create_placeholder_session().await?;
        self.assign_target(progress.id, &node, level, session, true).await?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OptionId;
    use crate::resolver::tests::node;
    use chrono::{TimeZone, Utc};

    fn option(id: u64, votes: u32, at: Option<i64>) -> VotingOption {
        VotingOption {
            id: OptionId(id),
            node_id: NodeId(id),
            target_level: 1,
            vote_count: votes,
            last_highest_vote_at: at.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            node: node(id, &format!("n{}", id), 0, 1),
        }
    }

    #[test]
    fn most_votes_wins() {
        let options = [option(1, 5, Some(10)), option(2, 10, Some(20)), option(3, 3, Some(5))];
        assert_eq!(find_winning_option(&options).unwrap().id, OptionId(2));
    }

    #[test]
    fn tie_goes_to_earliest() {
        let options = [option(1, 5, Some(200)), option(2, 5, Some(100))];
        assert_eq!(find_winning_option(&options).unwrap().id, OptionId(2));

        let options = [option(1, 5, Some(100)), option(2, 5, Some(200))];
        assert_eq!(find_winning_option(&options).unwrap().id, OptionId(1));
    }

    #[test]
    fn timestamp_beats_missing_timestamp() {
        let options = [option(1, 2, None), option(2, 2, Some(100))];
        assert_eq!(find_winning_option(&options).unwrap().id, OptionId(2));
    }

    #[test]
    fn empty_has_no_winner() {
        assert!(find_winning_option(&[]).is_none());
    }

    #[test]
    fn zero_votes_is_roughly_uniform() {
        let options = [option(1, 0, None), option(2, 0, None), option(3, 0, None), option(4, 0, None)];
        let trials = 4000;
        let mut counts = [0usize; 4];
        for _ in 0..trials {
            let w = find_winning_option(&options).unwrap();
            counts[(w.id.0 - 1) as usize] += 1;
        }
        // Expected 1000 each; 700 is far outside any plausible deviation
        for (i, c) in counts.iter().enumerate() {
            assert!(*c > 700 && *c < 1300, "option {} chosen {} times", i + 1, c);
        }
    }

    #[test]
    fn candidates_are_capped_and_sorted() {
        let candidates: Vec<(Node, u32)> = ["e", "b", "f", "a", "d", "c"]
            .iter()
            .enumerate()
            .map(|(i, k)| (node(i as u64 + 1, k, 0, 1), 1))
            .collect();

        for _ in 0..50 {
            let selected = select_candidates(candidates.clone(), 4);
            assert_eq!(selected.len(), 4);
            let keys: Vec<&str> = selected.iter().map(|(n, _)| n.key.as_str()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
            sorted.dedup();
            assert_eq!(sorted.len(), 4);
        }
    }

    #[test]
    fn shuffle_reaches_every_candidate() {
        let candidates: Vec<(Node, u32)> = (1..=6)
            .map(|i| (node(i, &format!("k{}", i), 0, 1), 1))
            .collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            for (n, _) in select_candidates(candidates.clone(), 2) {
                seen.insert(n.key);
            }
        }
        assert_eq!(seen.len(), 6);
    }
}
