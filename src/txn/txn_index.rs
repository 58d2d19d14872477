use std::collections::HashMap;

const NONE: usize = usize::MAX;

/// One buffered operation of a live transaction.
#[derive(Debug, Clone)]
pub enum OpKind {
    Insert { record: Vec<u8>, flags: u32 },
    Erase { dup_idx: Option<u32> },
}

#[derive(Debug, Clone)]
pub struct TxnOperation {
    pub txn_id: u64,
    pub lsn: u64,
    pub key: Vec<u8>,
    pub kind: OpKind,
    next: usize,
}

/// Per-key chain of buffered operations.
struct TxnNode {
    first: usize,
    last: usize,
}

/// Maps key -> txn node for one database. Operations live in an arena
/// and are addressed by small indices; a node keeps the chain of its
/// key's operations in insertion order.
pub struct TxnIndex {
    nodes: HashMap<Vec<u8>, TxnNode>,
    arena: Vec<Option<TxnOperation>>,
    free: Vec<usize>,
}

impl TxnIndex {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            arena: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends an operation to its key's chain; returns the arena
    /// index.
    pub fn append(&mut self, txn_id: u64, lsn: u64, key: Vec<u8>, kind: OpKind) -> usize {
        let op = TxnOperation {
            txn_id,
            lsn,
            key: key.clone(),
            kind,
            next: NONE,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.arena[index] = Some(op);
                index
            }
            None => {
                self.arena.push(Some(op));
                self.arena.len() - 1
            }
        };

        match self.nodes.get_mut(&key) {
            Some(node) => {
                if let Some(last) = self.arena[node.last].as_mut() {
                    last.next = index;
                }
                node.last = index;
            }
            None => {
                self.nodes.insert(
                    key,
                    TxnNode {
                        first: index,
                        last: index,
                    },
                );
            }
        }
        index
    }

    pub fn get(&self, index: usize) -> Option<&TxnOperation> {
        self.arena.get(index).and_then(|op| op.as_ref())
    }

    /// The newest buffered operation for this key.
    pub fn latest(&self, key: &[u8]) -> Option<&TxnOperation> {
        let node = self.nodes.get(key)?;
        self.get(node.last)
    }

    /// Unlinks one operation from its key's chain and releases the
    /// arena slot.
    pub fn remove(&mut self, index: usize) {
        let (key, next) = match &self.arena[index] {
            Some(op) => (op.key.clone(), op.next),
            None => return,
        };
        self.arena[index] = None;
        self.free.push(index);

        let node = match self.nodes.get_mut(&key) {
            Some(node) => node,
            None => return,
        };

        if node.first == index {
            if node.last == index {
                self.nodes.remove(&key);
            } else {
                node.first = next;
            }
            return;
        }

        // unlink from the middle of the chain
        let mut cur = node.first;
        while cur != NONE {
            let cur_next = self.arena[cur].as_ref().map(|op| op.next).unwrap_or(NONE);
            if cur_next == index {
                if let Some(op) = self.arena[cur].as_mut() {
                    op.next = next;
                }
                if node.last == index {
                    node.last = cur;
                }
                return;
            }
            cur = cur_next;
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.arena.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order_and_removal() {
        let mut index = TxnIndex::new();
        let a = index.append(1, 10, b"k".to_vec(), OpKind::Insert {
            record: b"v1".to_vec(),
            flags: 0,
        });
        let b = index.append(1, 11, b"k".to_vec(), OpKind::Erase { dup_idx: None });

        match &index.latest(b"k").unwrap().kind {
            OpKind::Erase { .. } => {}
            other => panic!("unexpected op: {:?}", other),
        }

        index.remove(b);
        match &index.latest(b"k").unwrap().kind {
            OpKind::Insert { record, .. } => assert_eq!(record, b"v1"),
            other => panic!("unexpected op: {:?}", other),
        }

        index.remove(a);
        assert!(index.latest(b"k").is_none());
        assert!(index.is_empty());
    }
}
