//! Property checks over the classifier and the selection loop.

use proptest::prelude::*;
use routing::{Complexity, ComplexityLevel, TaskClassifier};

proptest! {
    /// Classifying the same text twice yields the same vector.
    #[test]
    fn classifier_is_deterministic(text in "[ -~]{1,300}") {
        let classifier = TaskClassifier::new();
        let first = classifier.classify(&text);
        let second = classifier.classify(&text);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "classification determinism violated"),
        }
    }

    /// The scalar score stays inside [0, 1] for any input.
    #[test]
    fn classifier_score_is_normalized(text in "\\PC{1,300}") {
        let classifier = TaskClassifier::new();
        if let Ok(complexity) = classifier.classify(&text) {
            prop_assert!((0.0..=1.0).contains(&complexity.score));
        }
    }

    /// The overall level never exceeds the strongest axis.
    #[test]
    fn overall_is_bounded_by_axes(
        r in 0u8..4, k in 0u8..4, c in 0u8..4, d in 0u8..4,
    ) {
        fn level(i: u8) -> ComplexityLevel {
            match i {
                0 => ComplexityLevel::Low,
                1 => ComplexityLevel::Medium,
                2 => ComplexityLevel::High,
                _ => ComplexityLevel::VeryHigh,
            }
        }
        let complexity = Complexity::from_axes(level(r), level(k), level(c), level(d));
        let strongest = [level(r), level(k), level(c), level(d)]
            .into_iter()
            .max()
            .expect("four axes");
        prop_assert!(complexity.overall <= strongest);
        prop_assert!((0.0..=1.0).contains(&complexity.score));
    }
}

mod async_invariants {
    use routing::{
        Complexity, ComplexityLevel, HealthTracker, PromptOptimizer, ProviderRecord,
        ProviderRegistry, ProviderTier, Requirements, ScoringSelector,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn cache_never_exceeds_configured_size() {
        let config = common::SpoConfig {
            cache_size: 8,
            ..common::SpoConfig::default()
        };
        let optimizer = PromptOptimizer::new(config);
        for i in 0..50 {
            let prompt = format!("Prompt {i} asking for something slightly different.");
            optimizer
                .optimize(&prompt, &Complexity::uniform(ComplexityLevel::Medium))
                .await
                .unwrap();
            assert!(optimizer.cache_len().await <= 8);
        }
    }

    #[tokio::test]
    async fn assignments_have_sane_confidence_and_cost() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .reload(vec![
                ProviderRecord::new("A", ProviderTier::Official, "https://a", &["m1"]),
                ProviderRecord::new("B", ProviderTier::Community, "https://b", &["m1", "m2"]),
                ProviderRecord::new("C", ProviderTier::Unofficial, "https://c", &["m2"]),
            ])
            .await
            .unwrap();
        let tracker = Arc::new(HealthTracker::new(common::HealthConfig::default()));
        let selector = ScoringSelector::new(registry, tracker, common::SelectorConfig::default());

        for level in [
            ComplexityLevel::Low,
            ComplexityLevel::Medium,
            ComplexityLevel::High,
            ComplexityLevel::VeryHigh,
        ] {
            let assignment = selector
                .select("task", &Complexity::uniform(level), &Requirements::default())
                .await
                .unwrap();
            assert!((0.0..=1.0).contains(&assignment.confidence));
            assert!(assignment.estimated_cost >= 0.0);
            assert!(assignment.alternatives.len() <= 3);
            for alternative in &assignment.alternatives {
                assert!((0.0..=1.0).contains(&alternative.confidence));
                assert!(alternative.estimated_cost >= 0.0);
            }
        }
    }
}
