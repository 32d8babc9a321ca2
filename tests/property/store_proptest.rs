//! Property-based tests for the action store

use doublecheck_sync::offline::action::{ActionKind, ActionPatch, ActionStatus};
use doublecheck_sync::offline::store::ActionStore;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Remove(usize),
    Fail(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Enqueue),
        1 => (0usize..16).prop_map(Op::Remove),
        1 => (0usize..16).prop_map(Op::Fail),
    ]
}

proptest! {
    #[test]
    fn test_list_preserves_enqueue_order(ops in prop::collection::vec(op(), 1..40)) {
        tokio_test::block_on(async {
            let store = ActionStore::in_memory().await.unwrap();
            let mut expected = Vec::new();

            for op in ops {
                match op {
                    Op::Enqueue => {
                        let id = store.enqueue(ActionKind::PhotoUpload, serde_json::json!({})).await.unwrap();
                        expected.push(id);
                    }
                    Op::Remove(index) if !expected.is_empty() => {
                        let id = expected.remove(index % expected.len());
                        prop_assert!(store.remove(&id).await.unwrap());
                    }
                    Op::Fail(index) if !expected.is_empty() => {
                        let id = &expected[index % expected.len()];
                        store
                            .update(id, ActionPatch::default().status(ActionStatus::Failed).increment_attempts())
                            .await
                            .unwrap();
                    }
                    _ => {}
                }
            }

            let listed: Vec<_> = store.list(None).await.unwrap().into_iter().map(|a| a.id).collect();
            prop_assert_eq!(listed, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
