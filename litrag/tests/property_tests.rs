//! Property tests for the parent store, deduplication, filters, and reranking.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use litrag::reranker::plan_batches;
use litrag::{
    Chunk, FieldConstraint, InMemoryParentStore, ParentDocument, ParentStore, Reranker, Result,
    Scorer, build_filter_expression, dedup_chunks,
};
use proptest::prelude::*;

/// Generate a parent document with a short id from a small alphabet so that
/// duplicates and misses both occur.
fn arb_document() -> impl Strategy<Value = ParentDocument> {
    ("[a-f]{1,2}", "[a-z ]{1,20}", 1990i64..2025)
        .prop_map(|(id, text, year)| ParentDocument::new(id, text).with_metadata("year", year))
}

/// Generate a chunk whose `(id, text)` collides often.
fn arb_chunk() -> impl Strategy<Value = Chunk> {
    ("c[0-4]", "p[0-3]", "[xy]{1,2}").prop_map(|(id, parent, text)| Chunk::new(id, parent, text))
}

/// Scores a document by the integer prefix of its text.
struct TextScorer;

#[async_trait]
impl Scorer for TextScorer {
    async fn score(&self, _query: &str, pairs: &[(&str, &str)]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(_, text)| text.split(':').next().and_then(|n| n.parse().ok()).unwrap_or(0.0))
            .collect())
    }
}

/// **Property 1: Parent store lookups align with the request**
/// *For any* stored documents and any requested ids, `get_many` SHALL return
/// one entry per requested id in request order, `Some` exactly for stored ids,
/// holding the earliest stored row for that id.
mod prop_get_many_alignment {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn output_matches_requested_ids(
            documents in proptest::collection::vec(arb_document(), 0..15),
            requested in proptest::collection::vec("[a-f]{1,2}", 0..15),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let found = rt.block_on(async {
                let store = InMemoryParentStore::new("parents").unwrap();
                store.put_many(&documents).await.unwrap();
                let ids: Vec<&str> = requested.iter().map(String::as_str).collect();
                store.get_many(&ids).await.unwrap()
            });

            prop_assert_eq!(found.len(), requested.len());
            for (id, entry) in requested.iter().zip(&found) {
                let earliest = documents.iter().find(|d| &d.id == id);
                prop_assert_eq!(entry.as_ref(), earliest);
            }
        }
    }
}

/// **Property 2: Chunk deduplication**
/// *For any* chunk sequence, deduplication SHALL keep the first occurrence of
/// each `(id, text)` pair in input order, and deduplicating again SHALL change
/// nothing.
mod prop_dedup {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn keeps_first_occurrences_and_is_idempotent(
            chunks in proptest::collection::vec(arb_chunk(), 0..30),
        ) {
            let once = dedup_chunks(chunks.clone());
            let twice = dedup_chunks(once.clone());
            prop_assert_eq!(&once, &twice);

            let mut seen = HashSet::new();
            let expected: Vec<Chunk> = chunks
                .into_iter()
                .filter(|c| seen.insert((c.id.clone(), c.text.clone())))
                .collect();
            prop_assert_eq!(once, expected);
        }
    }
}

/// **Property 3: Merge-remainder batching**
/// *For any* candidate count and batch size, the batches SHALL be contiguous,
/// cover every candidate exactly once, and never contain a trailing batch
/// shorter than the batch size unless it is the only batch.
mod prop_plan_batches {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn batches_cover_candidates_without_short_tail(
            len in 0usize..200,
            batch_size in 1usize..25,
        ) {
            let batches = plan_batches(len, batch_size);

            let mut next = 0;
            for batch in &batches {
                prop_assert_eq!(batch.start, next);
                prop_assert!(!batch.is_empty());
                next = batch.end;
            }
            prop_assert_eq!(next, len);

            if len >= batch_size {
                prop_assert_eq!(batches.len(), len / batch_size);
                prop_assert!(
                    batches.iter().all(|b| b.len() >= batch_size && b.len() < 2 * batch_size)
                );
            } else {
                prop_assert!(batches.len() <= 1);
            }
        }
    }
}

/// **Property 4: Rerank output bounds and ordering**
/// *For any* candidates and `top_k`, the reranker SHALL return
/// `min(top_k, unique candidates)` results with non-increasing scores and
/// consecutive ranks, and equal scores SHALL keep their input order.
mod prop_rerank {
    use super::*;

    fn arb_candidate() -> impl Strategy<Value = ParentDocument> {
        ("d[0-9]", 0u8..5)
            .prop_map(|(id, score)| ParentDocument::new(id.clone(), format!("{score}:{id}")))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn output_is_bounded_sorted_and_stable(
            candidates in proptest::collection::vec(arb_candidate(), 0..40),
            top_k in 1usize..15,
            batch_size in 1usize..12,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let reranker = Reranker::new(Arc::new(TextScorer)).with_batch_size(batch_size);
            let results = rt.block_on(reranker.rerank("q", candidates.clone(), top_k)).unwrap();

            let mut seen = HashSet::new();
            let unique: Vec<&ParentDocument> =
                candidates.iter().filter(|d| seen.insert((d.id.clone(), d.text.clone()))).collect();
            prop_assert_eq!(results.len(), top_k.min(unique.len()));

            for (rank, result) in results.iter().enumerate() {
                prop_assert_eq!(result.rank, rank);
            }
            for window in results.windows(2) {
                prop_assert!(window[0].score >= window[1].score);
                if window[0].score == window[1].score {
                    let position = |doc: &ParentDocument| unique.iter().position(|u| *u == doc);
                    prop_assert!(position(&window[0].document) < position(&window[1].document));
                }
            }
        }
    }
}

/// **Property 5: Filter rendering preserves constraint order**
/// *For any* list of valid string constraints, the rendered expression SHALL
/// hold one parenthesized predicate per constraint, joined by `and`, in input
/// order.
mod prop_filter_order {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn predicates_follow_input_order(
            pairs in proptest::collection::vec(("[a-z][a-z_]{0,6}", "[A-Za-z0-9 ./-]{0,12}"), 1..6),
        ) {
            let constraints: Vec<FieldConstraint> = pairs
                .iter()
                .filter(|(field, _)| field != "year")
                .map(|(field, value)| FieldConstraint::new(field.clone(), value.clone()))
                .collect();
            prop_assume!(!constraints.is_empty());

            let expr = build_filter_expression(&constraints, false).unwrap();
            let predicates: Vec<&str> = expr.as_str().split(") and (").collect();
            prop_assert_eq!(predicates.len(), constraints.len());
            for (predicate, constraint) in predicates.iter().zip(&constraints) {
                let predicate = predicate.trim_start_matches('(');
                let expected_prefix = format!("{} == ", constraint.field);
                prop_assert!(predicate.starts_with(&expected_prefix));
            }
        }
    }
}
