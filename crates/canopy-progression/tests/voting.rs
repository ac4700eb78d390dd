//! Voting session integration tests
//!
//! Covers:
//! - concurrent voters and per-session vote uniqueness
//! - single-candidate auto-selection
//! - freeze / resume / end transitions
//! - identity registration on first vote

mod common;

use canopy_progression::{Error, ProgressionEvent, SessionStatus};
use common::{drain, harness, node};

fn flat_tree(keys: &[&str]) -> Vec<serde_json::Value> {
    keys.iter().map(|k| node(k, 0, &[])).collect()
}

// =============================================================================
// Votes
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_voters_are_all_counted() {
    let h = harness(flat_tree(&["a", "b", "c", "d"])).await;
    h.service.initialize_progression_state().await.unwrap();
    let session = h.service.get_active_voting_session().await.unwrap().unwrap();
    assert_eq!(session.options.len(), 3);

    let handles: Vec<_> = (0..10usize)
        .map(|i| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .vote_for_unlock("twitch", &format!("id-{}", i), &format!("viewer{}", i), i % 3 + 1)
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let session = h.service.get_active_voting_session().await.unwrap().unwrap();
    let counts: Vec<u32> = session.options.iter().map(|o| o.vote_count).collect();
    assert_eq!(counts, vec![4, 3, 3]);
    assert_eq!(counts.iter().sum::<u32>(), 10);

    // Each vote also awards one contribution point
    assert_eq!(h.accumulated().await, 10);
    let board = h.service.get_contribution_leaderboard(20).await.unwrap();
    assert_eq!(board.len(), 10);
    assert!(board.iter().all(|entry| entry.points == 1));
}

#[tokio::test]
async fn repeat_vote_is_rejected() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();

    h.service.vote_for_unlock("twitch", "1001", "alice", 1).await.unwrap();
    let err = h
        .service
        .vote_for_unlock("twitch", "1001", "alice", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UserAlreadyVoted), "got {:?}", err);

    let session = h.service.get_active_voting_session().await.unwrap().unwrap();
    let counts: Vec<u32> = session.options.iter().map(|o| o.vote_count).collect();
    assert_eq!(counts, vec![1, 0]);
}

#[tokio::test]
async fn option_index_is_one_based_and_bounded() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();

    for index in [0, 3] {
        let err = h
            .service
            .vote_for_unlock("twitch", "1001", "alice", index)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidOption { count: 2, .. }),
            "index {} gave {:?}",
            index,
            err
        );
    }
}

#[tokio::test]
async fn first_vote_registers_user() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();

    h.service.vote_for_unlock("discord", "42", "carol", 1).await.unwrap();

    let board = h.service.get_contribution_leaderboard(1).await.unwrap();
    let user_id = &board[0].user_id;
    assert_eq!(h.identity.username(user_id).await.as_deref(), Some("carol"));

    let err = h
        .service
        .vote_for_unlock("discord", "43", "  ", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Identity(_)));
}

#[tokio::test]
async fn voting_without_session_fails() {
    let h = harness(flat_tree(&["a"])).await;
    let err = h
        .service
        .vote_for_unlock("twitch", "1001", "alice", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
}

// =============================================================================
// Auto-selection
// =============================================================================

#[tokio::test]
async fn single_candidate_is_selected_without_public_session() {
    let h = harness(flat_tree(&["a"])).await;
    let mut rx = h.service.events().receiver();

    h.service.start_voting_session(None).await.unwrap();

    assert_eq!(h.target_key().await.as_deref(), Some("a"));
    assert!(h.service.get_active_voting_session().await.unwrap().is_none());

    let backing = h
        .service
        .get_most_recent_voting_session()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backing.status, SessionStatus::Completed);
    assert_eq!(backing.winning_option().map(|o| o.node.key.as_str()), Some("a"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressionEvent::TargetSet { node_key, auto_selected: true, .. } if node_key == "a"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressionEvent::VotingStarted { session_id: None, auto_selected: true, options, .. }
            if options.len() == 1
    )));
}

#[tokio::test]
async fn second_session_is_rejected() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();

    let err = h.service.start_voting_session(None).await.unwrap_err();
    assert!(matches!(err, Error::SessionAlreadyActive));
}

// =============================================================================
// Freeze / resume / end
// =============================================================================

#[tokio::test]
async fn frozen_session_rejects_votes_until_resumed() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();

    h.service.admin_freeze_voting().await.unwrap();
    let session = h.service.get_active_voting_session().await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Frozen);

    let err = h
        .service
        .vote_for_unlock("twitch", "1001", "alice", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));

    let err = h.service.admin_freeze_voting().await.unwrap_err();
    assert!(matches!(err, Error::SessionAlreadyFrozen));

    h.service.admin_start_voting().await.unwrap();
    h.service.vote_for_unlock("twitch", "1001", "alice", 1).await.unwrap();

    let err = h.service.admin_start_voting().await.unwrap_err();
    assert!(matches!(err, Error::SessionAlreadyActive));
}

#[tokio::test]
async fn admin_end_voting_closes_frozen_session() {
    let h = harness(flat_tree(&["a", "b", "c"])).await;
    h.service.initialize_progression_state().await.unwrap();
    h.service.admin_freeze_voting().await.unwrap();

    let winner = h.service.admin_end_voting().await.unwrap();
    let latest = h
        .service
        .get_most_recent_voting_session()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.status, SessionStatus::Completed);
    assert_eq!(latest.winning_option_id, Some(winner.id));

    let err = h.service.end_voting().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
}

#[tokio::test]
async fn ending_vote_with_no_target_sets_winner_as_target() {
    let h = harness(flat_tree(&["a", "b"])).await;
    // Two candidates and nothing accumulating: a public vote with no target
    h.service.start_voting_session(None).await.unwrap();
    assert!(h.target_key().await.is_none());

    h.service.vote_for_unlock("twitch", "1001", "alice", 2).await.unwrap();
    let winner = h.service.end_voting().await.unwrap();

    assert_eq!(winner.node.key, "b");
    assert_eq!(h.target_key().await.as_deref(), Some("b"));
}
