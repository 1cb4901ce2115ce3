//! Episode lifecycle scenarios: boundary triggers and invariants.

mod common;

use chrono::Duration;
use session_memory_core::{CloseReason, EpisodeStatus, MemoryConfig, Role, StorageBackend};

use common::{harness_without_reflector, TestHarness};

async fn open_episode_count(h: &TestHarness) -> usize {
    h.storage
        .get_episodes("test-session", Some(EpisodeStatus::Open), None)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn initialize_opens_exactly_one_episode() {
    let h = harness_without_reflector(MemoryConfig::default()).await;
    assert_eq!(open_episode_count(&h).await, 1);
    // Idempotent.
    h.memory.initialize().await.unwrap();
    assert_eq!(open_episode_count(&h).await, 1);
}

#[tokio::test]
async fn time_gap_closes_before_appending() {
    let mut config = MemoryConfig::default();
    config.episode.max_time_gap_seconds = 60;
    let h = harness_without_reflector(config).await;

    let turn_a = h.memory.ingest(Role::User, "turn A").await.unwrap();
    h.clock.advance(Duration::seconds(120));
    let turn_b = h.memory.ingest(Role::User, "turn B").await.unwrap();

    let closed = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Closed), None)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].turn_ids, vec![turn_a]);
    assert_eq!(closed[0].close_reason, Some(CloseReason::TimeGap));

    // Turn B is the first turn of the new open episode.
    let open = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Open), None)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].turn_ids, vec![turn_b]);
}

#[tokio::test]
async fn turns_under_the_gap_stay_in_one_episode() {
    let mut config = MemoryConfig::default();
    config.episode.max_time_gap_seconds = 60;
    let h = harness_without_reflector(config).await;

    h.memory.ingest(Role::User, "turn A").await.unwrap();
    h.clock.advance(Duration::seconds(59));
    h.memory.ingest(Role::User, "turn B").await.unwrap();

    let closed = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Closed), None)
        .await
        .unwrap();
    assert!(closed.is_empty());
}

#[tokio::test]
async fn max_turns_closes_and_reopens() {
    let mut config = MemoryConfig::default();
    config.episode.max_turns_per_episode = 3;
    let h = harness_without_reflector(config).await;

    for i in 0..7 {
        h.memory.ingest(Role::User, &format!("turn {i}")).await.unwrap();
        h.clock.advance(Duration::seconds(1));
        assert_eq!(open_episode_count(&h).await, 1, "after turn {i}");
    }

    let closed = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Closed), None)
        .await
        .unwrap();
    assert_eq!(closed.len(), 2);
    for episode in &closed {
        assert_eq!(episode.turn_count, 3);
        assert_eq!(episode.close_reason, Some(CloseReason::MaxTurns));
        assert!(episode.closed_at.unwrap() >= episode.opened_at);
    }
    // 7 = 3 + 3 + 1 still open.
    let open = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Open), None)
        .await
        .unwrap();
    assert_eq!(open[0].turn_count, 1);
}

#[tokio::test]
async fn tool_turns_close_episodes_when_configured() {
    let mut config = MemoryConfig::default();
    config.episode.close_on_tool_result = true;
    let h = harness_without_reflector(config).await;

    h.memory.ingest(Role::User, "run the tests").await.unwrap();
    h.memory.ingest(Role::Tool, "all passed, 42 tests").await.unwrap();

    let closed = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Closed), None)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].close_reason, Some(CloseReason::ToolResult));
    assert_eq!(closed[0].turn_count, 2);
}

#[tokio::test]
async fn close_patterns_close_episodes() {
    let mut config = MemoryConfig::default();
    config.episode.close_on_patterns = vec![r"(?i)^that's all".to_string()];
    let h = harness_without_reflector(config).await;

    h.memory.ingest(Role::User, "one more thing").await.unwrap();
    h.memory.ingest(Role::User, "That's all for now").await.unwrap();

    let closed = h
        .storage
        .get_episodes("test-session", Some(EpisodeStatus::Closed), None)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].close_reason, Some(CloseReason::PatternMatch));
}

#[tokio::test]
async fn explicit_close_returns_id_and_reopens() {
    let h = harness_without_reflector(MemoryConfig::default()).await;

    // Nothing to close yet.
    assert_eq!(h.memory.close_episode("noop").await.unwrap(), None);

    h.memory.ingest(Role::User, "some content").await.unwrap();
    let closed_id = h.memory.close_episode("user asked").await.unwrap().unwrap();

    let episode = h.storage.get_episode(closed_id).await.unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Closed);
    assert_eq!(
        episode.close_reason,
        Some(CloseReason::Explicit("user asked".to_string()))
    );
    assert_eq!(open_episode_count(&h).await, 1);
}

#[tokio::test]
async fn every_turn_belongs_to_exactly_one_episode() {
    let mut config = MemoryConfig::default();
    config.episode.max_turns_per_episode = 2;
    let h = harness_without_reflector(config).await;

    let mut turn_ids = Vec::new();
    for i in 0..5 {
        turn_ids.push(h.memory.ingest(Role::User, &format!("turn {i}")).await.unwrap());
        h.clock.advance(Duration::seconds(1));
    }

    let episodes = h.storage.get_episodes("test-session", None, None).await.unwrap();
    for turn_id in turn_ids {
        let owners = episodes
            .iter()
            .filter(|e| e.turn_ids.contains(&turn_id))
            .count();
        assert_eq!(owners, 1, "turn {turn_id} must belong to exactly one episode");
        let turn = h.storage.get_turn(turn_id).await.unwrap().unwrap();
        let owner = episodes.iter().find(|e| e.turn_ids.contains(&turn_id)).unwrap();
        assert_eq!(turn.episode_id, owner.episode_id);
    }
}

#[tokio::test]
async fn ingest_order_matches_created_at_order() {
    let h = harness_without_reflector(MemoryConfig::default()).await;

    // The clock never advances; monotonicity must come from the facade.
    let mut turn_ids = Vec::new();
    for i in 0..4 {
        turn_ids.push(h.memory.ingest(Role::User, &format!("turn {i}")).await.unwrap());
    }

    let mut previous = None;
    for turn_id in turn_ids {
        let turn = h.storage.get_turn(turn_id).await.unwrap().unwrap();
        if let Some(previous) = previous {
            assert!(turn.created_at > previous);
        }
        previous = Some(turn.created_at);
    }
}
