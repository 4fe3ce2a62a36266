//! Property-based tests using proptest to verify invariants

use durastore::history::ranges::deletion_plan;
use durastore::history::{build_garbage_cleanup_info, split_garbage_cleanup_info, BranchToken, NodeRange, NodeRangeSet};
use durastore::providers::in_memory::InMemoryProvider;
use durastore::requests::{CreateWorkflowExecutionRequest, GetTasksRequest};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Strategies
// ============================================================================

fn arb_id() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9-]{1,12}").unwrap()
}

/// Workflow ids are caller-chosen and may contain the descriptor separator.
fn arb_workflow_id() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9:]{0,20}").unwrap()
}

fn arb_ranges() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..60, 0i64..20).prop_map(|(begin, len)| (begin, begin + len)), 0..8)
}

fn set_of(ranges: &[(i64, i64)]) -> NodeRangeSet {
    let mut set = NodeRangeSet::new();
    for (begin, end) in ranges {
        set.insert("b", NodeRange::new(*begin, *end));
    }
    set
}

fn covered(ranges: &[(i64, i64)], node_id: i64) -> bool {
    ranges.iter().any(|(begin, end)| *begin <= node_id && node_id < *end)
}

// ============================================================================
// Property 1: Cleanup descriptors round-trip
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_garbage_info_round_trips(domain in arb_id(), workflow in arb_workflow_id(), run in arb_id()) {
        let info = build_garbage_cleanup_info(&domain, &workflow, &run);
        let (d, w, r) = split_garbage_cleanup_info(&info).unwrap();
        prop_assert_eq!(d, domain);
        prop_assert_eq!(w, workflow);
        prop_assert_eq!(r, run);
    }
}

// ============================================================================
// Property 2: NodeRangeSet behaves like a set of node ids
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_insert_covers_exactly_the_union(ranges in arb_ranges()) {
        let set = set_of(&ranges);
        for node_id in 0..90 {
            prop_assert_eq!(set.contains("b", node_id), covered(&ranges, node_id), "node {}", node_id);
        }
    }

    /// Stored intervals stay sorted, non-empty, disjoint and non-adjacent.
    #[test]
    fn prop_insert_normalizes(ranges in arb_ranges()) {
        let set = set_of(&ranges);
        let stored = set.ranges("b");
        for r in stored {
            prop_assert!(!r.is_empty());
        }
        for pair in stored.windows(2) {
            prop_assert!(pair[0].end < pair[1].begin, "{:?} touches {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn prop_difference_removes_exactly_the_other(a in arb_ranges(), b in arb_ranges()) {
        let diff = set_of(&a).difference(&set_of(&b));
        for node_id in 0..90 {
            prop_assert_eq!(
                diff.contains("b", node_id),
                covered(&a, node_id) && !covered(&b, node_id),
                "node {}", node_id
            );
        }
    }
}

// ============================================================================
// Property 3: Branch deletion never frees nodes a survivor still reads
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_deletion_plan_spares_survivors(first_fork in 2i64..30, second_fork in 2i64..30) {
        let root = BranchToken::new_root("tree");
        let child = root.fork(first_fork, "child").unwrap();
        let grandchild = child.fork(second_fork, "grandchild").unwrap();

        for (target, survivors) in [
            (&root, vec![&child, &grandchild]),
            (&child, vec![&root, &grandchild]),
            (&grandchild, vec![&root, &child]),
        ] {
            let plan = deletion_plan(target, survivors.iter().copied());
            let mut kept = NodeRangeSet::new();
            for s in &survivors {
                kept.union_with(&NodeRangeSet::from_branch(s));
            }
            for (branch_id, range) in plan.iter() {
                for node_id in range.begin..range.end.min(range.begin + 64) {
                    prop_assert!(!kept.contains(branch_id, node_id), "{} node {} still read", branch_id, node_id);
                }
            }
            // Whatever the target read and nobody else does is freed
            for segment in target.segments() {
                let end = segment.end_node_id.min(64);
                for node_id in segment.begin_node_id..end {
                    if !kept.contains(&segment.branch_id, node_id) {
                        prop_assert!(plan.contains(&segment.branch_id, node_id));
                    }
                }
            }
        }
    }
}

// ============================================================================
// Property 4: Transfer reads return exactly (read_level, max_read_level]
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_transfer_read_window(
        ids in prop::collection::btree_set(1i64..200, 0..30),
        read_level in 0i64..200,
        span in 0i64..100,
        batch_size in 1usize..8,
    ) {
        let max_read_level = read_level + span;
        let returned = tokio::runtime::Runtime::new().unwrap().block_on(async {
            read_all_transfer(&ids, read_level, max_read_level, batch_size).await
        });
        let expected: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| *id > read_level && *id <= max_read_level)
            .collect();
        prop_assert_eq!(returned, expected);
    }
}

async fn read_all_transfer(ids: &BTreeSet<i64>, read_level: i64, max_read_level: i64, batch_size: usize) -> Vec<i64> {
    use chrono::Utc;
    use durastore::execution::{CreateWorkflowMode, ExecutionInfo, WorkflowSnapshot, WorkflowState};
    use durastore::task::{Task, TransferTask, TransferTaskKind};
    use durastore::{Provider, ShardInfo};

    let provider = InMemoryProvider::new();
    provider.create_shard(ShardInfo::new(1, "host", 1)).await.unwrap();
    let snapshot = WorkflowSnapshot {
        execution_info: ExecutionInfo {
            domain_id: "d".into(),
            workflow_id: "w".into(),
            run_id: "r".into(),
            state: WorkflowState::Running,
            next_event_id: 2,
            ..Default::default()
        },
        tasks: ids
            .iter()
            .map(|id| {
                Task::Transfer(TransferTask {
                    task_id: *id,
                    visibility_timestamp: Utc::now(),
                    version: 0,
                    kind: TransferTaskKind::CloseExecution,
                })
            })
            .collect(),
        ..Default::default()
    };
    provider
        .create_workflow_execution(CreateWorkflowExecutionRequest {
            shard_id: 1,
            range_id: 1,
            mode: CreateWorkflowMode::BrandNew,
            previous_run_id: String::new(),
            previous_last_write_version: 0,
            new_workflow_snapshot: snapshot,
        })
        .await
        .unwrap();

    let mut req = GetTasksRequest {
        shard_id: 1,
        read_level,
        max_read_level,
        batch_size,
        next_page_token: None,
    };
    let mut out = Vec::new();
    loop {
        let page = provider.get_transfer_tasks(req.clone()).await.unwrap();
        assert!(page.tasks.len() <= batch_size);
        out.extend(page.tasks.iter().map(|t| t.task.task_id));
        match page.next_page_token {
            Some(token) => req.next_page_token = Some(token),
            None => break,
        }
    }
    out
}
