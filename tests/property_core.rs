// tests/property_core.rs

use proptest::prelude::*;

use fsrefresh::engine::{choose_path, commit_decision, AccessProbe, CommitDecision, ExecutionPath};
use fsrefresh::types::Modality;

fn probe_strategy() -> impl Strategy<Value = AccessProbe> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(w, r, d)| AccessProbe {
        holds_write: w,
        holds_read: r,
        is_dispatch_thread: d,
    })
}

fn modality_strategy() -> impl Strategy<Value = Modality> {
    prop_oneof![
        Just(Modality::Any),
        Just(Modality::NonModal),
        (0u32..8).prop_map(Modality::Level),
    ]
}

proptest! {
    #[test]
    fn only_synchronous_calls_can_block_or_be_refused(asynchronous in any::<bool>(), probe in probe_strategy()) {
        let path = choose_path(asynchronous, probe);
        if asynchronous {
            prop_assert_eq!(path, ExecutionPath::Enqueue);
        } else {
            prop_assert_ne!(path, ExecutionPath::Enqueue);
        }
    }

    #[test]
    fn refusal_happens_exactly_for_read_off_dispatch(probe in probe_strategy()) {
        let refused = choose_path(false, probe) == ExecutionPath::Refuse;
        prop_assert_eq!(
            refused,
            !probe.holds_write && probe.holds_read && !probe.is_dispatch_thread
        );
    }

    #[test]
    fn never_waits_while_holding_write(probe in probe_strategy()) {
        prop_assume!(probe.holds_write);
        prop_assert_eq!(choose_path(false, probe), ExecutionPath::Inline);
    }

    #[test]
    fn any_intervening_write_forces_retry(g0 in any::<u64>(), writes in 0u64..1000) {
        let decision = commit_decision(g0, g0.wrapping_add(writes));
        prop_assert_eq!(decision == CommitDecision::Apply, writes == 0);
    }

    #[test]
    fn closing_modal_levels_never_blocks_a_runnable_task(m in modality_strategy(), depth in 0u32..8) {
        if m.permits(depth) && depth > 0 {
            prop_assert!(m.permits(depth - 1));
        }
    }
}
