pub mod manager;
pub mod txn_index;

pub use manager::{TxnManager, TxnState, TxnStatus, TXN_READ_ONLY, TXN_TEMPORARY};
pub use txn_index::{OpKind, TxnIndex, TxnOperation};

use core::fmt;
use std::sync::Arc;

use crate::{env::EnvInner, types::OakResult};

/// A handle to one live transaction. Dropping the handle without
/// committing leaves the transaction open; it is aborted when the
/// environment closes or recovery runs.
pub struct Transaction {
    pub(crate) id: u64,
    pub(crate) env: Arc<EnvInner>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn commit(self) -> OakResult {
        crate::env::commit_txn(&self.env, self.id)
    }

    pub fn abort(self) -> OakResult {
        crate::env::abort_txn(&self.env, self.id)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return write!(f, "{}", self);
    }
}
