//! Boundary to the clinical ranking engine. The engine itself is an external
//! collaborator; the platform only requires that `score` is pure and
//! deterministic in its four inputs.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::canonical::canonical_json_bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRemedy {
    pub rank: i32,
    pub remedy: String,
    pub score: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring engine unavailable: {0}")]
    Unavailable(String),
    #[error("scoring input could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    /// Produces an ordered ranking for a case. Must be deterministic in
    /// `(case_id, inputs, params, seed)` and hold no hidden state.
    async fn score(
        &self,
        case_id: Uuid,
        inputs: &Value,
        params: &Value,
        seed: &str,
    ) -> Result<Vec<ScoredRemedy>, ScoringError>;
}

const REMEDY_TABLE: &[&str] = &[
    "nux-vomica",
    "arsenicum-album",
    "lycopodium",
    "pulsatilla",
    "sulphur",
    "phosphorus",
    "sepia",
    "aurum-metallicum",
];

const DEFAULT_TOP_N: usize = 5;

/// Stand-in engine used until the real ranking engine is wired in. It derives
/// a stable score per remedy from a digest of the canonical inputs, so equal
/// inputs always yield byte-equal rankings.
#[derive(Debug, Default, Clone)]
pub struct DeterministicEngine;

impl DeterministicEngine {
    fn remedy_score(inputs_bytes: &[u8], params_bytes: &[u8], seed: &str, remedy: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(inputs_bytes);
        hasher.update(params_bytes);
        hasher.update(seed.as_bytes());
        hasher.update(remedy.as_bytes());
        let digest = hasher.finalize();

        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        // Two-decimal score in [0, 100); coarse enough to exercise tie-breaks.
        (u64::from_be_bytes(raw) % 10_000) as f64 / 100.0
    }
}

#[async_trait]
impl ScoringEngine for DeterministicEngine {
    async fn score(
        &self,
        _case_id: Uuid,
        inputs: &Value,
        params: &Value,
        seed: &str,
    ) -> Result<Vec<ScoredRemedy>, ScoringError> {
        let inputs_bytes = canonical_json_bytes(inputs)?;
        let params_bytes = canonical_json_bytes(params)?;

        let top_n = params
            .get("top_n")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_TOP_N);

        let mut scored: Vec<(String, f64)> = REMEDY_TABLE
            .iter()
            .map(|remedy| {
                (
                    remedy.to_string(),
                    Self::remedy_score(&inputs_bytes, &params_bytes, seed, remedy),
                )
            })
            .collect();

        // Highest score first; name ascending breaks ties deterministically.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .take(top_n)
            .enumerate()
            .map(|(i, (remedy, score))| ScoredRemedy {
                rank: i as i32 + 1,
                remedy,
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn equal_inputs_yield_equal_rankings() {
        let engine = DeterministicEngine;
        let case_id = Uuid::new_v4();
        let inputs = json!({"symptom_ids": [1, 2, 3]});
        let params = json!({});

        let first = engine.score(case_id, &inputs, &params, "0").await.unwrap();
        let second = engine.score(case_id, &inputs, &params, "0").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ranking_is_ordered_and_nonempty() {
        let engine = DeterministicEngine;
        let ranking = engine
            .score(Uuid::new_v4(), &json!({"symptom_ids": [7]}), &json!({}), "0")
            .await
            .unwrap();

        assert!(!ranking.is_empty());
        for (i, row) in ranking.iter().enumerate() {
            assert_eq!(row.rank, i as i32 + 1);
        }
        for pair in ranking.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn seed_changes_the_ranking_bytes() {
        let engine = DeterministicEngine;
        let inputs = json!({"symptom_ids": [1, 2]});
        let a = engine
            .score(Uuid::new_v4(), &inputs, &json!({}), "0")
            .await
            .unwrap();
        let b = engine
            .score(Uuid::new_v4(), &inputs, &json!({}), "1")
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn top_n_param_caps_the_ranking() {
        let engine = DeterministicEngine;
        let ranking = engine
            .score(
                Uuid::new_v4(),
                &json!({"symptom_ids": [1]}),
                &json!({"top_n": 3}),
                "0",
            )
            .await
            .unwrap();
        assert_eq!(ranking.len(), 3);
    }
}
