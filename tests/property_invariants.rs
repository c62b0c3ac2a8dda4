// tests/property_invariants.rs

//! Property-based tests for invariants that must hold over arbitrary input,
//! not just the handful of cases a unit test happens to pick.

use pg_fanout::core::registry::conflict::{resolve, Candidate, Winner};
use pg_fanout::core::types::Tri;
use proptest::prelude::*;

fn candidate(owner: &str, region: &str, run_id: &str) -> Candidate {
    Candidate {
        owner: owner.to_string(),
        region: region.to_string(),
        run_id: run_id.to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    /// Once a `Tri` latches to a known value, no sequence of further probe
    /// results can move it, regardless of how many times or what values
    /// arrive afterward.
    #[test]
    fn tri_latch_is_sticky_once_known(
        first in prop::bool::ANY,
        rest in prop::collection::vec(prop::bool::ANY, 0..20),
    ) {
        let mut t = Tri::Unknown.latch(Tri::from_bool(first));
        let settled = t;
        for b in rest {
            t = t.latch(Tri::from_bool(b));
            prop_assert_eq!(t, settled);
        }
    }

    /// A candidate whose region matches `local_region` always beats an
    /// existing registrant outside that region, no matter the run id
    /// ordering between the two.
    #[test]
    fn local_region_candidate_always_displaces_a_foreign_existing(
        local_region in "[a-z]{2,8}",
        other_region in "[a-z]{2,8}",
        run_existing in "[0-9]{1,6}",
        run_candidate in "[0-9]{1,6}",
    ) {
        prop_assume!(local_region != other_region);
        let existing = candidate("node-existing", &other_region, &run_existing);
        let challenger = candidate("node-candidate", &local_region, &run_candidate);

        prop_assert_eq!(resolve(&existing, &challenger, &local_region), Winner::Candidate);
    }

    /// When neither registrant is in the local region, the outcome depends
    /// only on run id ordering, never on which side of the call is "existing"
    /// versus "candidate" for the purpose of the run id comparison itself.
    #[test]
    fn foreign_region_tie_break_follows_run_id_ordering(
        local_region in "[a-z]{2,8}",
        shared_region in "[a-z]{2,8}",
        run_existing in "[0-9]{1,6}",
        run_candidate in "[0-9]{1,6}",
    ) {
        prop_assume!(local_region != shared_region);
        let existing = candidate("node-existing", &shared_region, &run_existing);
        let challenger = candidate("node-candidate", &shared_region, &run_candidate);

        let winner = resolve(&existing, &challenger, &local_region);
        if run_candidate < run_existing {
            prop_assert_eq!(winner, Winner::Candidate);
        } else {
            prop_assert_eq!(winner, Winner::Existing);
        }
    }
}
