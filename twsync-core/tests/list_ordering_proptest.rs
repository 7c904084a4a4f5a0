//! Property tests for list accumulation and id routing

use proptest::prelude::*;
use std::collections::BTreeSet;
use twsync_core::{ConnectionFlag, EventKind, ListPromise, Promise, RequestError, RequestRepository};

fn repository() -> RequestRepository {
    RequestRepository::new(ConnectionFlag::connected())
}

proptest! {
    /// Appended elements come back exactly in delivery order
    #[test]
    fn prop_list_preserves_order(elements in prop::collection::vec(any::<i64>(), 0..64)) {
        let repo = repository();
        let list: ListPromise<i64> = repo
            .register_list(EventKind::HistoricalData, Some(1), || Ok(()))
            .unwrap();

        for element in &elements {
            repo.append_to_list(EventKind::HistoricalData, Some(1), *element);
        }
        repo.complete_list(EventKind::HistoricalData, Some(1));

        prop_assert_eq!(list.get().unwrap(), elements);
        prop_assert_eq!(repo.pending_count(), 0);
    }

    /// Elements after finalization are dropped without touching the result
    #[test]
    fn prop_late_elements_dropped(
        before in prop::collection::vec(any::<u16>(), 0..16),
        after in prop::collection::vec(any::<u16>(), 1..16),
    ) {
        let repo = repository();
        let list: ListPromise<u16> = repo
            .register_list(EventKind::Executions, None, || Ok(()))
            .unwrap();

        for element in &before {
            repo.append_to_list(EventKind::Executions, None, *element);
        }
        repo.complete_list(EventKind::Executions, None);
        for element in &after {
            repo.append_to_list(EventKind::Executions, None, *element);
        }

        prop_assert_eq!(list.get().unwrap(), before);
        prop_assert_eq!(repo.stats().dropped_events, after.len() as u64);
    }

    /// Every id-only failure reaches exactly the waiter registered under that id
    #[test]
    fn prop_fail_by_id_routes_to_owner(ids in prop::collection::btree_set(1i32..10_000, 1..32)) {
        let repo = repository();
        let promises: Vec<(i32, Promise<()>)> = ids
            .iter()
            .map(|id| {
                let promise = repo
                    .register_single(EventKind::ContractDetails, Some(*id), || Ok(()))
                    .unwrap();
                (*id, promise)
            })
            .collect();

        let failed: BTreeSet<i32> = ids.iter().copied().filter(|id| id % 2 == 0).collect();
        for id in &failed {
            prop_assert!(repo.fail(*id, RequestError::broker(*id, "rejected")));
        }

        for (id, promise) in &promises {
            if failed.contains(id) {
                prop_assert_eq!(promise.try_get(), Some(Err(RequestError::broker(*id, "rejected"))));
            } else {
                prop_assert!(!promise.is_done());
            }
        }
        prop_assert_eq!(repo.pending_count(), ids.len() - failed.len());
    }
}
