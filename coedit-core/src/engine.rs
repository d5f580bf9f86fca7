//! The CRDT sequence engine: one converged ordering of character runs.
//!
//! ```text
//! operation log (version order)          node list (document order)
//! ┌────┬────┬────┬────┬────┐   apply()   ┌─────┬─────┬─────┬─────┐
//! │ v1 │ v2 │ v3 │ v4 │ v5 │ ──────────► │ "H" │ "e" │ "y" │ ""† │
//! └────┴────┴────┴────┴────┘             └─────┴─────┴─────┴─────┘
//!                                          † tombstoned, still anchorable
//! ```
//!
//! The engine keeps one [`SequenceNode`] per accepted insert. Deletes shrink
//! node buffers and tombstone emptied nodes; nodes are never removed from the
//! list, so later operations can still anchor to their ids. Concurrent
//! inserts at the identical anchor pair are ordered by the `(counter, site)`
//! clock, which makes the final sequence independent of arrival order.
//!
//! All offsets and run lengths are measured in characters, not bytes.

use uuid::Uuid;

use crate::op::{Operation, OperationKind};

/// One run of inserted characters, wrapping a single insert operation.
///
/// Created when an insert is applied and kept for the lifetime of the
/// engine. The buffer may shrink to empty under deletes, at which point the
/// node is tombstoned but remains in place as an anchor target.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceNode {
    /// Id of the insert operation this node wraps
    pub op_id: Uuid,
    counter: u64,
    site: u64,
    left_anchor: Option<Uuid>,
    right_anchor: Option<Uuid>,
    buffer: String,
    tombstone: bool,
}

impl SequenceNode {
    fn from_insert(op: &Operation) -> Self {
        Self {
            op_id: op.id,
            counter: op.counter,
            site: op.site,
            left_anchor: op.left_anchor,
            right_anchor: op.right_anchor,
            buffer: op.value.clone(),
            tombstone: false,
        }
    }

    /// Live character count; zero once tombstoned.
    pub fn live_len(&self) -> usize {
        if self.tombstone {
            0
        } else {
            self.buffer.chars().count()
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Remove up to `count` characters starting at character offset `start`.
    /// Returns the number of characters actually removed.
    fn remove_chars(&mut self, start: usize, count: usize) -> usize {
        let len = self.buffer.chars().count();
        let start = start.min(len);
        let end = (start + count).min(len);
        if start == end {
            return 0;
        }
        let byte_start = char_to_byte(&self.buffer, start);
        let byte_end = char_to_byte(&self.buffer, end);
        self.buffer.replace_range(byte_start..byte_end, "");
        if self.buffer.is_empty() {
            self.tombstone = true;
        }
        end - start
    }
}

/// Byte index of the `char_idx`-th character of `s`.
fn char_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// In-memory reconstruction of a document as an ordered node list.
///
/// Built by replaying a document's operation log in ascending version order;
/// answers "what is the current text" and "apply this operation". The engine
/// is a derived cache: it can be discarded and rebuilt from the log at any
/// time.
#[derive(Debug, Clone, Default)]
pub struct SequenceEngine {
    nodes: Vec<SequenceNode>,
}

impl SequenceEngine {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Seed from a snapshot: the snapshot text becomes a single opaque run
    /// under a fresh id that no later operation can anchor to. Operations
    /// recorded after the snapshot version are replayed on top.
    pub fn seeded(text: &str) -> Self {
        let mut engine = Self::new();
        if !text.is_empty() {
            engine.nodes.push(SequenceNode {
                op_id: Uuid::new_v4(),
                counter: 0,
                site: 0,
                left_anchor: None,
                right_anchor: None,
                buffer: text.to_string(),
                tombstone: false,
            });
        }
        engine
    }

    /// Apply one operation. Never fails: unknown anchor ids degrade to the
    /// sequence boundaries, since a client may race an anchor's visibility.
    pub fn apply(&mut self, op: &Operation) {
        match op.kind {
            OperationKind::Insert => self.insert(op),
            OperationKind::Delete => self.delete(op),
        }
    }

    fn insert(&mut self, op: &Operation) {
        let index = self.insertion_index(op);
        self.nodes.insert(index, SequenceNode::from_insert(op));
    }

    fn delete(&mut self, op: &Operation) {
        let target = self.insertion_index(op);
        let mut offset = self.char_offset_before(target);
        let mut remaining = op.run_len();
        let mut position = 0usize;

        for node in &mut self.nodes {
            if node.tombstone {
                continue;
            }
            let node_len = node.buffer.chars().count();
            let next_position = position + node_len;
            if next_position <= offset {
                position = next_position;
                continue;
            }
            let start = offset.saturating_sub(position);
            let removed = node.remove_chars(start, remaining);
            remaining -= removed;
            position = next_position - removed;
            offset = position;
            if remaining == 0 {
                break;
            }
        }
    }

    /// Deterministic placement for an operation's anchor pair.
    ///
    /// Walks forward from the left anchor past nodes that carry the identical
    /// anchor pair and a smaller `(counter, site)` clock, so any two replicas
    /// place the same operation set identically regardless of arrival order.
    fn insertion_index(&self, op: &Operation) -> usize {
        let mut position = match op.left_anchor {
            Some(id) => match self.index_of(id) {
                Some(i) => i + 1,
                None => {
                    log::debug!("left anchor {id} unknown, degrading to sequence start");
                    0
                }
            },
            None => 0,
        };
        let right_pos = match op.right_anchor {
            Some(id) => match self.index_of(id) {
                Some(i) => {
                    position = position.min(i);
                    i
                }
                None => {
                    log::debug!("right anchor {id} unknown, degrading to sequence end");
                    self.nodes.len()
                }
            },
            None => {
                position = position.min(self.nodes.len());
                self.nodes.len()
            }
        };

        while position < right_pos {
            let current = &self.nodes[position];
            let same_anchors = current.left_anchor == op.left_anchor
                && current.right_anchor == op.right_anchor;
            if same_anchors && op.tiebreak() > (current.counter, current.site) {
                position += 1;
            } else {
                break;
            }
        }
        position
    }

    fn index_of(&self, id: Uuid) -> Option<usize> {
        self.nodes.iter().position(|node| node.op_id == id)
    }

    /// Live characters before the node at `index`.
    fn char_offset_before(&self, index: usize) -> usize {
        self.nodes.iter().take(index).map(|n| n.live_len()).sum()
    }

    /// Current document text: live buffers concatenated in list order.
    pub fn current_text(&self) -> String {
        let mut text = String::with_capacity(self.live_len());
        for node in &self.nodes {
            if !node.tombstone {
                text.push_str(&node.buffer);
            }
        }
        text
    }

    /// Total node count, tombstoned nodes included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Count of fully tombstoned nodes.
    pub fn tombstone_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.tombstone).count()
    }

    /// Live character count of the whole sequence.
    pub fn live_len(&self) -> usize {
        self.nodes.iter().map(|n| n.live_len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.live_len() == 0
    }

    /// Whether an operation id is present in the node list (tombstoned nodes
    /// count, since they remain valid anchor targets).
    pub fn contains(&self, id: Uuid) -> bool {
        self.index_of(id).is_some()
    }
}


#[cfg(test)]
mod convergence_tests {
    use super::*;
    use crate::op::epoch_seconds;
    use proptest::prelude::*;

    fn concurrent_inserts() -> impl Strategy<Value = Vec<Operation>> {
        // Distinct (counter, site) clocks, all at the identical anchor pair.
        prop::collection::hash_set((1u64..16, 1u64..16), 1..10).prop_map(|clocks| {
            let document_id = Uuid::new_v4();
            clocks
                .into_iter()
                .enumerate()
                .map(|(i, (counter, site))| Operation {
                    id: Uuid::new_v4(),
                    document_id,
                    kind: OperationKind::Insert,
                    counter,
                    site,
                    left_anchor: None,
                    right_anchor: None,
                    value: char::from(b'a' + (i % 26) as u8).to_string(),
                    color: None,
                    version: (i + 1) as u64,
                    author_id: Uuid::nil(),
                    created_at: epoch_seconds(),
                })
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        /// Concurrent inserts at the same anchor pair converge to one text
        /// regardless of the order they arrive in.
        #[test]
        fn prop_concurrent_inserts_converge(
            (ops, shuffled) in concurrent_inserts()
                .prop_flat_map(|ops| {
                    let shuffled = Just(ops.clone()).prop_shuffle();
                    (Just(ops), shuffled)
                })
        ) {
            let mut reference = SequenceEngine::new();
            for op in &ops {
                reference.apply(op);
            }
            let mut permuted = SequenceEngine::new();
            for op in &shuffled {
                permuted.apply(op);
            }
            prop_assert_eq!(reference.current_text(), permuted.current_text());
        }

        /// Replaying the same log from empty state twice yields the same
        /// text and the same tombstone state.
        #[test]
        fn prop_replay_is_idempotent(
            script in prop::collection::vec(
                (any::<bool>(), 0usize..8, 1u64..64, 1u64..8, 0usize..3),
                1..40,
            )
        ) {
            // Build a log where every anchor references an earlier insert.
            let document_id = Uuid::new_v4();
            let mut log: Vec<Operation> = Vec::new();
            let mut insert_ids: Vec<Uuid> = Vec::new();
            for (i, (is_insert, anchor_sel, counter, site, run)) in
                script.into_iter().enumerate()
            {
                let left_anchor = if insert_ids.is_empty() || anchor_sel == 0 {
                    None
                } else {
                    Some(insert_ids[(anchor_sel - 1) % insert_ids.len()])
                };
                let (kind, value) = if is_insert {
                    (OperationKind::Insert, "x".repeat(run + 1))
                } else {
                    (OperationKind::Delete, "x".repeat(run))
                };
                let op = Operation {
                    id: Uuid::new_v4(),
                    document_id,
                    kind,
                    counter,
                    site,
                    left_anchor,
                    right_anchor: None,
                    value,
                    color: None,
                    version: (i + 1) as u64,
                    author_id: Uuid::nil(),
                    created_at: epoch_seconds(),
                };
                if kind == OperationKind::Insert {
                    insert_ids.push(op.id);
                }
                log.push(op);
            }

            let mut first = SequenceEngine::new();
            let mut second = SequenceEngine::new();
            for op in &log {
                first.apply(op);
            }
            for op in &log {
                second.apply(op);
            }

            prop_assert_eq!(first.current_text(), second.current_text());
            prop_assert_eq!(first.node_count(), second.node_count());
            prop_assert_eq!(first.tombstone_count(), second.tombstone_count());
        }
    }
}
