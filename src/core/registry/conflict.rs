// src/core/registry/conflict.rs

//! Pure conflict-resolution rule used when two nodes race to register the
//! same registry key (most commonly: two nodes both start a connect
//! supervisor for the same tenant during a region rebalance).

/// A candidate for a registry slot: who it belongs to and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub owner: String,
    pub region: String,
    /// Monotonic-ish tie-breaker; smaller wins. In practice a millisecond
    /// timestamp concatenated with a random suffix so ties are still total.
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Existing,
    Candidate,
}

/// Decides which of two registrants keeps the slot.
///
/// Rule: a registrant whose region matches `local_region` is preferred over
/// one that doesn't (a node should own tenants local to its own region
/// whenever that's on offer). If both or neither match, the registrant with
/// the lexicographically smaller `run_id` wins — run ids are timestamp
/// prefixed, so this is "whoever registered first".
pub fn resolve(existing: &Candidate, candidate: &Candidate, local_region: &str) -> Winner {
    let existing_local = existing.region == local_region;
    let candidate_local = candidate.region == local_region;

    if existing_local != candidate_local {
        return if candidate_local {
            Winner::Candidate
        } else {
            Winner::Existing
        };
    }

    if candidate.run_id < existing.run_id {
        Winner::Candidate
    } else {
        Winner::Existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(owner: &str, region: &str, run_id: &str) -> Candidate {
        Candidate {
            owner: owner.to_string(),
            region: region.to_string(),
            run_id: run_id.to_string(),
        }
    }

    #[test]
    fn region_match_wins_over_earlier_run_id() {
        let existing = candidate("node-a", "us-east", "0001");
        let candidate_entry = candidate("node-b", "eu-west", "0000");
        assert_eq!(
            resolve(&existing, &candidate_entry, "eu-west"),
            Winner::Candidate
        );
    }

    #[test]
    fn smaller_run_id_wins_when_regions_tie() {
        let existing = candidate("node-a", "us-east", "0005");
        let candidate_entry = candidate("node-b", "us-east", "0002");
        assert_eq!(
            resolve(&existing, &candidate_entry, "ap-south"),
            Winner::Candidate
        );
    }

    #[test]
    fn equal_run_ids_favor_existing() {
        let existing = candidate("node-a", "us-east", "0005");
        let candidate_entry = candidate("node-b", "us-east", "0005");
        assert_eq!(
            resolve(&existing, &candidate_entry, "ap-south"),
            Winner::Existing
        );
    }
}
