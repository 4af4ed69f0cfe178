//! Routing keys for scattered entries
//!
//! Every destination node gets a small byte range, `node<id>` up to its
//! successor. The stage writes the start of that range into each row and the
//! downstream range router, planned with [`routing_span_for_node`], sends the
//! row to the stream colocated with the node. Node 0 gets a range like any
//! other node; routers normally leave it unplanned so it falls through to
//! their default stream.

use ahash::AHashMap;
use restore_core::{Key, NodeId, RestoreError, Result};
use std::sync::Arc;

const BYTES_MARKER: u8 = 0x12;
const ESCAPE: u8 = 0x00;
const ESCAPED_00: u8 = 0xff;
const ESCAPED_TERM: u8 = 0x01;

/// Start and end routing datums for a node
pub fn routing_datums_for_node(node: NodeId) -> (Vec<u8>, Vec<u8>) {
    let start = Key::new(format!("node{}", node.0));
    let end = start.next();
    (start.0, end.0)
}

/// Node a routing datum was produced for
pub fn node_for_routing_key(routing_key: &[u8]) -> Option<NodeId> {
    let digits = routing_key.strip_prefix(b"node")?;
    std::str::from_utf8(digits).ok()?.parse().ok().map(NodeId)
}

/// Encoded routing span for a node, used when planning the output router
pub fn routing_span_for_node(node: NodeId) -> (Vec<u8>, Vec<u8>) {
    let (start, end) = routing_datums_for_node(node);
    (encode_bytes_ascending(&start), encode_bytes_ascending(&end))
}

/// Order-preserving encoding of a byte string: a marker byte, the bytes
/// with `0x00` escaped, and a terminator. Encoded values sort like the raw
/// values.
pub fn encode_bytes_ascending(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 3);
    buf.push(BYTES_MARKER);
    for &b in data {
        if b == ESCAPE {
            buf.push(ESCAPE);
            buf.push(ESCAPED_00);
        } else {
            buf.push(b);
        }
    }
    buf.push(ESCAPE);
    buf.push(ESCAPED_TERM);
    buf
}

/// Routing datums computed so far, one allocation per node
#[derive(Debug, Default)]
pub struct RoutingDatumCache {
    datums: AHashMap<NodeId, Arc<[u8]>>,
}

impl RoutingDatumCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing datum for `node`, computed on first use
    pub fn get_or_insert(&mut self, node: NodeId) -> Arc<[u8]> {
        self.datums
            .entry(node)
            .or_insert_with(|| {
                let (start, _) = routing_datums_for_node(node);
                Arc::from(start)
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.datums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }
}

/// An output stream of the router and the encoded span routed to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSpan {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub stream: usize,
}

/// Picks an output stream for a row by its routing key
#[derive(Debug, Clone)]
pub struct RangeRouter {
    /// Sorted by start, non-overlapping
    spans: Vec<RouterSpan>,
    default_stream: Option<usize>,
}

impl RangeRouter {
    pub fn new(mut spans: Vec<RouterSpan>, default_stream: Option<usize>) -> Result<Self> {
        spans.sort_by(|a, b| a.start.cmp(&b.start));
        for span in &spans {
            if span.start >= span.end {
                return Err(RestoreError::InvalidConfig(format!(
                    "empty router span for stream {}",
                    span.stream
                )));
            }
        }
        for pair in spans.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(RestoreError::InvalidConfig(format!(
                    "router spans for streams {} and {} overlap",
                    pair[0].stream, pair[1].stream
                )));
            }
        }
        Ok(Self {
            spans,
            default_stream,
        })
    }

    /// Router sending each node's rows to the given stream
    pub fn for_nodes(nodes: &[(NodeId, usize)], default_stream: Option<usize>) -> Result<Self> {
        let spans = nodes
            .iter()
            .map(|&(node, stream)| {
                let (start, end) = routing_span_for_node(node);
                RouterSpan { start, end, stream }
            })
            .collect();
        Self::new(spans, default_stream)
    }

    /// Output stream for a row's routing key, or the default stream when no
    /// span covers it
    pub fn route(&self, routing_key: &[u8]) -> Option<usize> {
        let encoded = encode_bytes_ascending(routing_key);
        let idx = self.spans.partition_point(|s| s.start <= encoded);
        if idx > 0 {
            let span = &self.spans[idx - 1];
            if encoded < span.end {
                return Some(span.stream);
            }
        }
        self.default_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_routing_datums() {
        let (start, end) = routing_datums_for_node(NodeId(5));
        assert_eq!(start, b"node5".to_vec());
        assert_eq!(end, b"node5\x00".to_vec());

        let (start, end) = routing_datums_for_node(NodeId::UNKNOWN);
        assert_eq!(start, b"node0".to_vec());
        assert_eq!(end, b"node0\x00".to_vec());
    }

    #[test]
    fn test_node_for_routing_key() {
        let (start, end) = routing_datums_for_node(NodeId(42));
        assert_eq!(node_for_routing_key(&start), Some(NodeId(42)));
        assert_eq!(node_for_routing_key(&end), None);
        assert_eq!(node_for_routing_key(b"shard1"), None);
    }

    #[test]
    fn test_encode_bytes_ascending() {
        assert_eq!(encode_bytes_ascending(b"a"), vec![0x12, b'a', 0x00, 0x01]);
        assert_eq!(
            encode_bytes_ascending(b"a\x00"),
            vec![0x12, b'a', 0x00, 0xff, 0x00, 0x01]
        );
    }

    #[test]
    fn test_cache_allocates_once_per_node() {
        let mut cache = RoutingDatumCache::new();
        let a = cache.get_or_insert(NodeId(3));
        let b = cache.get_or_insert(NodeId(3));
        let c = cache.get_or_insert(NodeId(4));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*c, b"node4");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_router_routes_to_node_streams() {
        let router =
            RangeRouter::for_nodes(&[(NodeId(1), 0), (NodeId(2), 1), (NodeId(12), 2)], Some(3))
                .unwrap();

        assert_eq!(router.route(b"node1"), Some(0));
        assert_eq!(router.route(b"node2"), Some(1));
        assert_eq!(router.route(b"node12"), Some(2));
        // Unknown destination and unplanned nodes fall through.
        assert_eq!(router.route(b"node0"), Some(3));
        assert_eq!(router.route(b"node7"), Some(3));
    }

    #[test]
    fn test_router_without_default() {
        let router = RangeRouter::for_nodes(&[(NodeId(1), 0)], None).unwrap();
        assert_eq!(router.route(b"node9"), None);
    }

    #[test]
    fn test_router_rejects_overlap() {
        let spans = vec![
            RouterSpan {
                start: b"a".to_vec(),
                end: b"c".to_vec(),
                stream: 0,
            },
            RouterSpan {
                start: b"b".to_vec(),
                end: b"d".to_vec(),
                stream: 1,
            },
        ];
        assert!(RangeRouter::new(spans, None).is_err());
    }

    proptest! {
        #[test]
        fn prop_encoding_preserves_order(a in prop::collection::vec(any::<u8>(), 0..16),
                                         b in prop::collection::vec(any::<u8>(), 0..16)) {
            prop_assert_eq!(a.cmp(&b), encode_bytes_ascending(&a).cmp(&encode_bytes_ascending(&b)));
        }

        #[test]
        fn prop_node_spans_are_disjoint(x in 0u32..10_000, y in 0u32..10_000) {
            prop_assume!(x != y);
            let (xs, xe) = routing_span_for_node(NodeId(x));
            let (ys, ye) = routing_span_for_node(NodeId(y));
            prop_assert!(xe <= ys || ye <= xs);
        }

        #[test]
        fn prop_node_routes_to_its_own_stream(nodes in prop::collection::btree_set(1u32..500, 1..20)) {
            let planned: Vec<(NodeId, usize)> =
                nodes.iter().enumerate().map(|(i, n)| (NodeId(*n), i)).collect();
            let router = RangeRouter::for_nodes(&planned, Some(usize::MAX)).unwrap();
            for (node, stream) in planned {
                let (key, _) = routing_datums_for_node(node);
                prop_assert_eq!(router.route(&key), Some(stream));
            }
        }
    }
}
