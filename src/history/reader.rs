//! Paged reads across a branch's ancestry.

use serde::{Deserialize, Serialize};

use super::{HistoryEvent, HistoryNode};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::pagination::{decode_page_token, encode_page_token};
use crate::providers::{PersistenceError, Provider};
use crate::requests::{
    ReadHistoryBranchByBatchResponse, ReadHistoryBranchRequest, ReadHistoryBranchResponse, ReadHistoryNodesRequest,
    ReadRawHistoryBranchResponse,
};

/// Resume point carried in the continuation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ReadPosition {
    next_node_id: i64,
    last_transaction_id: i64,
    last_event_id: i64,
}

struct NodePage {
    nodes: Vec<(HistoryNode, Vec<HistoryEvent>)>,
    next_page_token: Option<Vec<u8>>,
    size: usize,
    last_first_event_id: i64,
}

async fn read_node_page<P: Provider + ?Sized>(
    provider: &P,
    req: &ReadHistoryBranchRequest,
) -> Result<NodePage, PersistenceError> {
    if req.min_event_id < 1 || req.min_event_id >= req.max_event_id {
        return Err(PersistenceError::invalid(format!(
            "invalid history range [{}, {})",
            req.min_event_id, req.max_event_id
        )));
    }
    let page_size = if req.page_size == 0 { DEFAULT_PAGE_SIZE } else { req.page_size };
    // A first page scans from the branch root; nodes ending below `min_event_id` are passed over
    let mut position = decode_page_token::<ReadPosition>(req.next_page_token.as_deref())?.unwrap_or(ReadPosition {
        next_node_id: 1,
        last_transaction_id: 0,
        last_event_id: 0,
    });

    let token = &req.branch_token;
    let mut nodes = Vec::new();
    'segments: for segment in token.segments() {
        let mut low = segment.begin_node_id.max(position.next_node_id);
        let high = segment.end_node_id.min(req.max_event_id);
        while low < high {
            let remaining = page_size - nodes.len();
            if remaining == 0 {
                break 'segments;
            }
            let rows = provider
                .read_history_nodes(ReadHistoryNodesRequest {
                    tree_id: token.tree_id.clone(),
                    branch_id: segment.branch_id.clone(),
                    min_node_id: low,
                    max_node_id: high,
                    limit: remaining,
                })
                .await?;
            let fetched = rows.len();
            for row in rows {
                low = row.node_id + 1;
                position.next_node_id = low;
                if row.transaction_id < position.last_transaction_id {
                    tracing::debug!(
                        tree_id = %token.tree_id,
                        branch_id = %segment.branch_id,
                        node_id = row.node_id,
                        transaction_id = row.transaction_id,
                        "skipping stale history node"
                    );
                    continue;
                }
                let events = row.blob.decode_events()?;
                let (Some(first), Some(last)) = (events.first(), events.last()) else {
                    return Err(PersistenceError::Corrupted(format!(
                        "history node {} of branch {} holds no events",
                        row.node_id, segment.branch_id
                    )));
                };
                if last.event_id < req.min_event_id {
                    position.last_transaction_id = row.transaction_id;
                    position.last_event_id = last.event_id;
                    continue;
                }
                let expected = (position.last_event_id + 1).max(req.min_event_id);
                let contiguous = if position.last_event_id + 1 < req.min_event_id {
                    first.event_id > position.last_event_id && first.event_id <= expected
                } else {
                    first.event_id == expected
                };
                if !contiguous {
                    return Err(PersistenceError::Corrupted(format!(
                        "history gap in branch {}: expected event {expected}, found {}",
                        token.branch_id, first.event_id
                    )));
                }
                position.last_transaction_id = row.transaction_id;
                position.last_event_id = last.event_id;
                nodes.push((row, events));
            }
            if fetched < remaining {
                break;
            }
        }
    }

    let next_page_token = if nodes.len() >= page_size {
        Some(encode_page_token(&position)?)
    } else {
        None
    };
    let size: usize = nodes.iter().map(|(n, _)| n.blob.len()).sum();
    let last_first_event_id = nodes.last().map_or(0, |(n, _)| n.node_id);
    Ok(NodePage {
        nodes,
        next_page_token,
        size,
        last_first_event_id,
    })
}

pub(crate) async fn read_history_branch<P: Provider + ?Sized>(
    provider: &P,
    req: &ReadHistoryBranchRequest,
) -> Result<ReadHistoryBranchResponse, PersistenceError> {
    let page = read_node_page(provider, req).await?;
    let events = page
        .nodes
        .into_iter()
        .flat_map(|(_, events)| events)
        .filter(|e| e.event_id >= req.min_event_id && e.event_id < req.max_event_id)
        .collect();
    Ok(ReadHistoryBranchResponse {
        events,
        next_page_token: page.next_page_token,
        size: page.size,
        last_first_event_id: page.last_first_event_id,
    })
}

pub(crate) async fn read_history_branch_by_batch<P: Provider + ?Sized>(
    provider: &P,
    req: &ReadHistoryBranchRequest,
) -> Result<ReadHistoryBranchByBatchResponse, PersistenceError> {
    let page = read_node_page(provider, req).await?;
    Ok(ReadHistoryBranchByBatchResponse {
        batches: page.nodes.into_iter().map(|(_, events)| events).collect(),
        next_page_token: page.next_page_token,
        size: page.size,
        last_first_event_id: page.last_first_event_id,
    })
}

pub(crate) async fn read_raw_history_branch<P: Provider + ?Sized>(
    provider: &P,
    req: &ReadHistoryBranchRequest,
) -> Result<ReadRawHistoryBranchResponse, PersistenceError> {
    let page = read_node_page(provider, req).await?;
    Ok(ReadRawHistoryBranchResponse {
        blobs: page.nodes.into_iter().map(|(node, _)| node.blob).collect(),
        next_page_token: page.next_page_token,
        size: page.size,
    })
}
