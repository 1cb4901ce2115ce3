//! Property tests for the system's core invariants.

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use session_memory_core::{
    HeuristicTokenCounter, Marker, MarkerDetector, MemoryConfig, RecallOptions, Role,
    SessionMemory, TokenCounter,
};
use session_memory_storage_mem::InMemoryStorage;
use session_memory_test_utils::{ManualClock, MockEmbedder};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counter_is_monotone_in_length(a in ".{0,200}", b in ".{0,200}") {
        let counter = HeuristicTokenCounter;
        let joined = format!("{a}{b}");
        prop_assert!(counter.count(&a) <= counter.count(&joined));
        prop_assert!(counter.count(&joined) <= counter.count(&a) + counter.count(&b) + 1);
    }

    #[test]
    fn counter_is_zero_only_for_empty(s in ".{1,200}") {
        prop_assert!(HeuristicTokenCounter.count(&s) > 0);
    }

    #[test]
    fn detection_is_a_pure_function_of_content(s in ".{0,400}") {
        let detector = MarkerDetector::new();
        prop_assert_eq!(detector.detect(&s), detector.detect(&s));
    }

    #[test]
    fn detection_sees_prefixes_after_any_newline(body in "[a-z ]{0,40}") {
        let detector = MarkerDetector::new();
        let content = format!("{body}\nDecision: go");
        prop_assert!(detector.detect(&content).contains(&Marker::Decision));
    }

    #[test]
    fn custom_markers_round_trip(label in "[a-zA-Z0-9_./-]{1,32}") {
        let marker = Marker::custom(label.clone()).unwrap();
        let parsed: Marker = marker.as_str().parse().unwrap();
        prop_assert_eq!(parsed, Marker::Custom(label));
    }
}

proptest! {
    // Full-pipeline properties drive a tokio runtime per case; keep the
    // case count low.
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn recall_never_exceeds_the_budget(
        sizes in prop::collection::vec(1usize..120, 1..12),
        budget in 1usize..400,
        pct in 0.0f32..=1.0,
        max_turns in 1usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let mut config = MemoryConfig::default();
            config.episode.max_turns_per_episode = max_turns;
            common::fast_retry(&mut config);
            let storage = Arc::new(InMemoryStorage::new());
            let memory = SessionMemory::builder("prop-session")
                .config(config)
                .storage(storage as Arc<dyn session_memory_core::StorageBackend>)
                .embedder(Arc::new(MockEmbedder::new(8))
                    as Arc<dyn session_memory_core::EmbeddingProvider>)
                .clock(Arc::new(ManualClock::default_epoch()))
                .build()
                .unwrap();
            memory.initialize().await.unwrap();

            for (i, tokens) in sizes.iter().enumerate() {
                let content = common::content_with_tokens(i, *tokens);
                let role = if i % 3 == 0 { Role::Assistant } else { Role::User };
                memory.ingest(role, &content).await.unwrap();
            }

            let items = memory
                .recall_with_options(
                    "what happened so far?",
                    RecallOptions {
                        token_budget: Some(budget),
                        current_episode_budget_pct: Some(pct),
                        ..RecallOptions::default()
                    },
                )
                .await
                .unwrap();

            let used: usize = items.iter().map(|i| i.token_count).sum();
            assert!(used <= budget, "used {used} of budget {budget}");

            // Dedup: no source id twice.
            let mut ids: Vec<_> = items.iter().map(|i| i.source_id).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), items.len());

            memory.close().await.unwrap();
        });
    }
}
