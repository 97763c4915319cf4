use serde::{Deserialize, Serialize};

use crate::{
    crash::crash_point_from_uniform,
    history::HistoryEntry,
    rng::{derive_hash_hex, ProvablyFairRng},
};

/// Outcome of re-deriving a completed round from its revealed seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub round_id: u64,
    pub commitment_matches: bool,
    pub recomputed_crash_point: f64,
    pub crash_point_matches: bool,
}

impl Verification {
    pub fn is_fair(&self) -> bool {
        self.commitment_matches && self.crash_point_matches
    }
}

/// Crash point a round must have had, given its revealed seeds.
pub fn recompute_crash_point(
    server_seed: &str,
    client_seed: &str,
    round_id: u64,
    instant_crash_probability: f64,
) -> f64 {
    let r = ProvablyFairRng::new(server_seed, client_seed, round_id).uniform();
    crash_point_from_uniform(r, instant_crash_probability)
}

/// Check that `hash(seed)` is the published commitment and that the seed
/// reproduces the published crash point.
pub fn verify_entry(entry: &HistoryEntry, instant_crash_probability: f64) -> Verification {
    let recomputed = recompute_crash_point(
        &entry.seed,
        &entry.client_seed,
        entry.round_id,
        instant_crash_probability,
    );
    Verification {
        round_id: entry.round_id,
        commitment_matches: derive_hash_hex(entry.seed.as_bytes()) == entry.commitment,
        recomputed_crash_point: recomputed,
        crash_point_matches: recomputed == entry.crash_point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::DEFAULT_INSTANT_CRASH_PROBABILITY as P;
    use chrono::Utc;

    fn honest(round_id: u64) -> HistoryEntry {
        let seed = "9f2c".repeat(16);
        HistoryEntry {
            round_id,
            crash_point: recompute_crash_point(&seed, "salt", round_id, P),
            timestamp: Utc::now(),
            commitment: derive_hash_hex(seed.as_bytes()),
            seed,
            client_seed: "salt".into(),
        }
    }

    #[test]
    fn honest_round_verifies() {
        let v = verify_entry(&honest(12), P);
        assert!(v.is_fair());
        assert_eq!(v.round_id, 12);
    }

    #[test]
    fn swapped_seed_breaks_commitment() {
        let mut entry = honest(3);
        entry.seed = "00".repeat(32);
        let v = verify_entry(&entry, P);
        assert!(!v.commitment_matches);
        assert!(!v.is_fair());
    }

    #[test]
    fn edited_crash_point_is_caught() {
        let mut entry = honest(5);
        entry.crash_point += 0.01;
        let v = verify_entry(&entry, P);
        assert!(v.commitment_matches);
        assert!(!v.crash_point_matches);
    }

    #[test]
    fn round_id_is_part_of_the_draw() {
        let seed = "9f2c".repeat(16);
        let mut points: Vec<u64> = (1..=20)
            .map(|id| (recompute_crash_point(&seed, "salt", id, P) * 100.0) as u64)
            .collect();
        points.dedup();
        assert!(points.len() > 1);
    }
}
