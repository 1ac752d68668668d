use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{
    cursor::{Cursor, CursorType},
    error::QueryError,
};

#[cfg(feature = "pg")]
mod pg;
#[cfg(feature = "pg")]
pub use pg::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<N> {
    pub cursor: CursorType,
    pub node: N,
}

impl<N: Cursor> From<N> for Edge<N> {
    fn from(value: N) -> Self {
        Self {
            cursor: value.to_cursor(),
            node: value,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<CursorType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<N> {
    pub edges: Vec<Edge<N>>,
    pub page_info: PageInfo,
}

impl<N> Default for QueryResult<N> {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}

impl<N> QueryResult<N> {
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.edges.iter().map(|edge| &edge.node)
    }

    pub fn into_nodes(self) -> Vec<N> {
        self.edges.into_iter().map(|edge| edge.node).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Forward page request: at most `first` nodes strictly after `after`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryArgs {
    pub first: u16,
    pub after: Option<CursorType>,
}

impl QueryArgs {
    pub fn forward(first: u16, after: Option<CursorType>) -> Self {
        Self { first, after }
    }
}

/// Pages over nodes that are already sorted by `key`.
///
/// Used by in-memory engines so that they hand out the same cursors as the sql ones. The
/// `after` cursor is decoded and compared by key, so it keeps working when the node it was
/// taken from no longer belongs to the set.
pub fn paginate<N, K, F>(
    nodes: Vec<N>,
    args: QueryArgs,
    key: F,
) -> Result<QueryResult<N>, QueryError>
where
    N: Cursor,
    K: Ord,
    F: Fn(&N) -> K,
{
    let start = match &args.after {
        Some(after) => {
            let after = key(&N::from_cursor(after)?);
            nodes.partition_point(|node| key(node) <= after)
        }
        None => 0,
    };

    let limit = usize::from(args.first);
    let mut edges = nodes
        .into_iter()
        .skip(start)
        .take(limit + 1)
        .map(Edge::from)
        .collect::<Vec<_>>();

    let has_next_page = edges.len() > limit;
    if has_next_page {
        edges.pop();
    }

    let page_info = PageInfo {
        has_next_page,
        end_cursor: edges.last().map(|edge| edge.cursor.clone()),
    };

    Ok(QueryResult { edges, page_info })
}
