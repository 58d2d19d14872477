use std::collections::HashMap;

use crate::error::OakError;

/// the transaction never appears in the journal as a begin/commit pair
pub const TXN_TEMPORARY: u32 = 0x1;

pub const TXN_READ_ONLY: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

pub struct TxnState {
    pub id: u64,
    pub name: Option<String>,
    pub flags: u32,
    pub status: TxnStatus,
    /// buffered operations in issue (= lsn) order: (dbname, arena
    /// index into that database's txn index)
    pub ops: Vec<(u16, usize)>,
}

/// Owns the list of live transactions, chained in begin order.
pub struct TxnManager {
    txns: HashMap<u64, TxnState>,
    order: Vec<u64>,
    next_id: u64,
}

impl TxnManager {
    pub fn new() -> Self {
        Self {
            txns: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    pub fn begin(&mut self, name: Option<&str>, flags: u32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.txns.insert(
            id,
            TxnState {
                id,
                name: name.map(|n| n.to_string()),
                flags,
                status: TxnStatus::Active,
                ops: Vec::new(),
            },
        );
        self.order.push(id);
        id
    }

    /// Recovery replays journaled transactions under their original
    /// ids.
    pub fn begin_with_id(&mut self, id: u64, name: Option<&str>, flags: u32) {
        self.txns.insert(
            id,
            TxnState {
                id,
                name: name.map(|n| n.to_string()),
                flags,
                status: TxnStatus::Active,
                ops: Vec::new(),
            },
        );
        self.order.push(id);
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    pub fn get(&self, id: u64) -> Result<&TxnState, OakError> {
        self.txns
            .get(&id)
            .ok_or_else(|| OakError::invalid_parameter("unknown transaction"))
    }

    pub fn get_mut(&mut self, id: u64) -> Result<&mut TxnState, OakError> {
        self.txns
            .get_mut(&id)
            .ok_or_else(|| OakError::invalid_parameter("unknown transaction"))
    }

    /// Live transaction ids in begin order.
    pub fn active_ids(&self) -> Vec<u64> {
        self.order
            .iter()
            .filter(|id| {
                self.txns
                    .get(id)
                    .map(|t| t.status == TxnStatus::Active)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    pub fn remove(&mut self, id: u64) {
        self.txns.remove(&id);
        self.order.retain(|other| *other != id);
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}
