use crate::history::{build_garbage_cleanup_info, split_garbage_cleanup_info, BranchToken, HistoryNode};
use crate::provider_validation::{append_request, event_ids, read_request, DOMAIN};
use crate::provider_validations::ProviderFactory;
use crate::providers::{PersistenceError, Provider};
use crate::requests::{
    CompleteForkBranchRequest, ForkHistoryBranchRequest, GetAllHistoryTreeBranchesRequest, ReadHistoryNodesRequest,
};

async fn nodes(provider: &dyn Provider, token: &BranchToken) -> Vec<HistoryNode> {
    provider
        .read_history_nodes(ReadHistoryNodesRequest {
            tree_id: token.tree_id.clone(),
            branch_id: token.branch_id.clone(),
            min_node_id: 1,
            max_node_id: i64::MAX,
            limit: 100,
        })
        .await
        .unwrap()
}

async fn all_event_ids(provider: &dyn Provider, token: &BranchToken) -> Vec<i64> {
    let resp = provider
        .read_history_branch(read_request(token, 1, 100, 100))
        .await
        .unwrap();
    event_ids(&resp.events)
}

/// Append batches `[1,2] [3,4] [5,6] ...` as consecutive transactions on a new root.
async fn seed_root(provider: &dyn Provider, tree_id: &str, batches: i64) -> BranchToken {
    let root = BranchToken::new_root(tree_id);
    for i in 0..batches {
        provider
            .append_history_nodes(append_request(&root, 1 + 2 * i, 2, 1 + i, i == 0))
            .await
            .unwrap();
    }
    root
}

async fn fork(provider: &dyn Provider, token: &BranchToken, fork_node_id: i64) -> BranchToken {
    provider
        .fork_history_branch(ForkHistoryBranchRequest {
            fork_branch_token: token.clone(),
            fork_node_id,
            info: build_garbage_cleanup_info(DOMAIN, "wf", "run-2"),
        })
        .await
        .unwrap()
        .new_branch_token
}

/// A node only accepts a strictly newer transaction.
pub async fn test_history_append_transaction_ordering<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: append transaction ordering");
    let provider = factory.create_provider().await;
    let root = BranchToken::new_root("tree-1");

    let mut t1 = append_request(&root, 1, 2, 1, true);
    t1.events[0].event_type = "written-by-t1".to_string();
    provider.append_history_nodes(t1.clone()).await.unwrap();

    let mut t2 = append_request(&root, 1, 2, 2, false);
    t2.events[0].event_type = "written-by-t2".to_string();
    let resp = provider.append_history_nodes(t2.clone()).await.unwrap();
    assert!(resp.size > 0);

    let err = provider.append_history_nodes(t1).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");
    let err = provider.append_history_nodes(t2).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");

    let stored = nodes(provider.as_ref(), &root).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].transaction_id, 2);
    let events = stored[0].blob.decode_events().unwrap();
    assert_eq!(events[0].event_type, "written-by-t2");
    tracing::info!("✓ Older transactions cannot overwrite a node");
}

/// A node superseded by a later rewrite of an earlier node is not returned.
pub async fn test_history_stale_node_skipped<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: stale nodes are skipped");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 2).await;

    // Node 1 rewritten to cover events 1..=4, leaving node 3 orphaned at an older transaction
    provider
        .append_history_nodes(append_request(&root, 1, 4, 3, false))
        .await
        .unwrap();

    let resp = provider
        .read_history_branch_by_batch(read_request(&root, 1, 100, 100))
        .await
        .unwrap();
    assert_eq!(resp.batches.len(), 1);
    assert_eq!(event_ids(&resp.batches[0]), vec![1, 2, 3, 4]);
    tracing::info!("✓ Stale node skipped");
}

pub async fn test_history_gap_is_corruption<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: gaps are reported as corruption");
    let provider = factory.create_provider().await;
    let root = BranchToken::new_root("tree-1");
    provider
        .append_history_nodes(append_request(&root, 1, 2, 1, true))
        .await
        .unwrap();
    provider
        .append_history_nodes(append_request(&root, 5, 2, 2, false))
        .await
        .unwrap();

    let err = provider
        .read_history_branch(read_request(&root, 1, 100, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Corrupted(_)), "got {err:?}");

    // Starting past the gap is fine
    let resp = provider
        .read_history_branch(read_request(&root, 5, 100, 100))
        .await
        .unwrap();
    assert_eq!(event_ids(&resp.events), vec![5, 6]);

    // An empty branch reads as empty
    let empty = BranchToken::new_root("tree-empty");
    let resp = provider
        .read_history_branch(read_request(&empty, 1, 100, 100))
        .await
        .unwrap();
    assert!(resp.events.is_empty());
    assert!(resp.next_page_token.is_none());
    tracing::info!("✓ Gap detected");
}

pub async fn test_history_paging_and_views<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: paging, batch and raw reads");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 4).await;

    let mut req = read_request(&root, 1, 100, 2);
    let mut collected = Vec::new();
    let mut pages = 0;
    loop {
        let resp = provider.read_history_branch(req.clone()).await.unwrap();
        collected.extend(event_ids(&resp.events));
        pages += 1;
        match resp.next_page_token {
            Some(token) => req.next_page_token = Some(token),
            None => break,
        }
        assert!(pages < 10, "paging does not terminate");
    }
    assert_eq!(collected, (1..=8).collect::<Vec<_>>());

    let by_batch = provider
        .read_history_branch_by_batch(read_request(&root, 1, 100, 10))
        .await
        .unwrap();
    let sizes: Vec<usize> = by_batch.batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 2, 2]);
    assert_eq!(by_batch.last_first_event_id, 7);

    let raw = provider
        .read_raw_history_branch(read_request(&root, 1, 100, 10))
        .await
        .unwrap();
    assert_eq!(raw.blobs.len(), 4);
    assert_eq!(raw.size, raw.blobs.iter().map(|b| b.len()).sum::<usize>());
    assert_eq!(event_ids(&raw.blobs[0].decode_events().unwrap()), vec![1, 2]);

    // max_event_id is exclusive and may cut a batch
    let cut = provider
        .read_history_branch(read_request(&root, 1, 6, 10))
        .await
        .unwrap();
    assert_eq!(event_ids(&cut.events), vec![1, 2, 3, 4, 5]);

    let err = provider
        .read_history_branch(read_request(&root, 0, 6, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidRequest(_)));
    tracing::info!("✓ History read views agree");
}

/// A read may start inside a batch: the containing node is found, not treated as a gap.
pub async fn test_history_read_from_mid_batch<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: reads starting inside a batch");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 3).await;

    let resp = provider
        .read_history_branch(read_request(&root, 2, 100, 100))
        .await
        .unwrap();
    assert_eq!(event_ids(&resp.events), vec![2, 3, 4, 5, 6]);

    let resp = provider
        .read_history_branch(read_request(&root, 4, 6, 100))
        .await
        .unwrap();
    assert_eq!(event_ids(&resp.events), vec![4, 5]);

    let by_batch = provider
        .read_history_branch_by_batch(read_request(&root, 4, 100, 100))
        .await
        .unwrap();
    let batches: Vec<Vec<i64>> = by_batch.batches.iter().map(|b| event_ids(b)).collect();
    assert_eq!(batches, vec![vec![3, 4], vec![5, 6]]);

    let raw = provider
        .read_raw_history_branch(read_request(&root, 6, 100, 100))
        .await
        .unwrap();
    assert_eq!(raw.blobs.len(), 1);
    assert_eq!(event_ids(&raw.blobs[0].decode_events().unwrap()), vec![5, 6]);

    // Paging from a mid-batch start resumes where the first page stopped
    let mut req = read_request(&root, 2, 100, 1);
    let mut collected = Vec::new();
    loop {
        let resp = provider.read_history_branch(req.clone()).await.unwrap();
        collected.extend(event_ids(&resp.events));
        match resp.next_page_token {
            Some(token) => req.next_page_token = Some(token),
            None => break,
        }
        assert!(collected.len() <= 6, "paging does not terminate");
    }
    assert_eq!(collected, vec![2, 3, 4, 5, 6]);

    // A fork carries its ancestor segment, and a mid-batch start still finds the node
    let forked = fork(provider.as_ref(), &root, 5).await;
    let resp = provider
        .read_history_branch(read_request(&forked, 3, 100, 100))
        .await
        .unwrap();
    assert_eq!(event_ids(&resp.events), vec![3, 4]);
    tracing::info!("✓ Mid-batch reads return the containing batch");
}

/// Writes to a fork never show through on the branch it was forked from.
pub async fn test_fork_isolation<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: fork isolation");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 3).await;

    let forked = fork(provider.as_ref(), &root, 5).await;
    assert_eq!(forked.tree_id, root.tree_id);
    assert_ne!(forked.branch_id, root.branch_id);
    let tree = provider.get_history_tree(&root.tree_id).await.unwrap();
    assert_eq!(tree.branches.len(), 2);
    let detail = tree
        .branches
        .iter()
        .find(|b| b.branch_id == forked.branch_id)
        .unwrap();
    assert!(detail.fork_in_progress);

    provider
        .complete_fork_branch(CompleteForkBranchRequest {
            branch_token: forked.clone(),
            success: true,
        })
        .await
        .unwrap();
    let tree = provider.get_history_tree(&root.tree_id).await.unwrap();
    assert!(tree.branches.iter().all(|b| !b.fork_in_progress));

    // Nothing of its own yet, but the inherited prefix is visible
    assert!(nodes(provider.as_ref(), &forked).await.is_empty());
    assert_eq!(all_event_ids(provider.as_ref(), &forked).await, vec![1, 2, 3, 4]);

    let mut diverge = append_request(&forked, 5, 2, 10, false);
    diverge.events[0].event_type = "forked".to_string();
    provider.append_history_nodes(diverge).await.unwrap();

    let fork_events = provider
        .read_history_branch(read_request(&forked, 1, 100, 100))
        .await
        .unwrap()
        .events;
    assert_eq!(event_ids(&fork_events), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(fork_events[4].event_type, "forked");

    let root_events = provider
        .read_history_branch(read_request(&root, 1, 100, 100))
        .await
        .unwrap()
        .events;
    assert_eq!(event_ids(&root_events), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(root_events[4].event_type, "event-5");
    tracing::info!("✓ Fork isolated from its source");
}

pub async fn test_fork_rejects_first_node<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: fork at the first node is invalid");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 1).await;

    for fork_node_id in [0, 1] {
        let err = provider
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: root.clone(),
                fork_node_id,
                info: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidRequest(_)), "got {err:?}");
    }
    assert_eq!(provider.get_history_tree(&root.tree_id).await.unwrap().branches.len(), 1);
    tracing::info!("✓ Fork at node 1 rejected");
}

pub async fn test_failed_fork_deletes_branch<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: failed fork is cleaned up");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 2).await;
    let forked = fork(provider.as_ref(), &root, 3).await;

    provider
        .complete_fork_branch(CompleteForkBranchRequest {
            branch_token: forked,
            success: false,
        })
        .await
        .unwrap();

    let tree = provider.get_history_tree(&root.tree_id).await.unwrap();
    assert_eq!(tree.branches.len(), 1);
    assert_eq!(tree.branches[0].branch_id, root.branch_id);
    assert_eq!(all_event_ids(provider.as_ref(), &root).await, vec![1, 2, 3, 4]);
    tracing::info!("✓ Failed fork removed");
}

/// Deleting a branch frees only nodes no surviving branch reads.
pub async fn test_delete_branch_keeps_shared_nodes<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: branch deletion keeps shared ancestry");
    let provider = factory.create_provider().await;
    let root = seed_root(provider.as_ref(), "tree-1", 3).await;
    let forked = fork(provider.as_ref(), &root, 5).await;
    provider
        .append_history_nodes(append_request(&forked, 5, 2, 10, false))
        .await
        .unwrap();

    provider.delete_history_branch(root.clone()).await.unwrap();
    let remaining: Vec<i64> = nodes(provider.as_ref(), &root).await.iter().map(|n| n.node_id).collect();
    assert_eq!(remaining, vec![1, 3]);
    assert_eq!(all_event_ids(provider.as_ref(), &forked).await, vec![1, 2, 3, 4, 5, 6]);
    let tree = provider.get_history_tree(&root.tree_id).await.unwrap();
    assert_eq!(tree.branches.len(), 1);

    provider.delete_history_branch(forked.clone()).await.unwrap();
    assert!(nodes(provider.as_ref(), &root).await.is_empty());
    assert!(nodes(provider.as_ref(), &forked).await.is_empty());
    assert!(provider.get_history_tree(&root.tree_id).await.unwrap().branches.is_empty());
    tracing::info!("✓ Shared nodes survived until their last reader was deleted");
}

pub async fn test_admin_lists_tree_branches<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history: admin branch listing");
    let provider = factory.create_provider().await;
    let Some(admin) = provider.as_admin() else {
        tracing::info!("provider has no admin capability, skipping");
        return;
    };
    let first = seed_root(provider.as_ref(), "tree-1", 2).await;
    fork(provider.as_ref(), &first, 3).await;
    seed_root(provider.as_ref(), "tree-2", 1).await;

    let mut branches = Vec::new();
    let mut token = None;
    loop {
        let page = admin
            .get_all_history_tree_branches(GetAllHistoryTreeBranchesRequest {
                page_size: 2,
                next_page_token: token,
            })
            .await
            .unwrap();
        assert!(page.branches.len() <= 2);
        branches.extend(page.branches);
        token = page.next_page_token;
        if token.is_none() {
            break;
        }
    }
    assert_eq!(branches.len(), 3);
    assert_eq!(branches.iter().filter(|b| b.tree_id == "tree-1").count(), 2);

    let root = branches.iter().find(|b| b.branch_id == first.branch_id).unwrap();
    let (domain_id, workflow_id, run_id) = split_garbage_cleanup_info(&root.info).unwrap();
    assert_eq!(domain_id, DOMAIN);
    assert_eq!(workflow_id, "wf");
    assert_eq!(run_id, "run-1");
    tracing::info!("✓ Admin branch listing");
}
