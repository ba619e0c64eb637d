//! Transaction manager: coordinates the WAL, buffer pool, and lock manager
//! across a transaction's begin/commit/rollback lifecycle.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use buffer::BufferPool;
use common::{DbError, DbResult, FileId, PageId, TxnId};
use hashbrown::HashMap;
use lockmgr::LockManager;
use parking_lot::Mutex;
use wal::{TxnOp, Wal, WalBody};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug)]
pub struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
}

/// One recorded page mutation, enough to undo it: the page's image before
/// the transaction wrote to it.
struct UndoEntry {
    file_id: FileId,
    page_id: PageId,
    before_image: Vec<u8>,
}

struct TxnRecord {
    state: TxnState,
    undo_log: Vec<UndoEntry>,
}

struct Inner {
    wal: Wal,
    active: HashMap<TxnId, TxnRecord>,
    next_id: u64,
}

/// Owns the write-ahead log and drives the `TRANSACTION BEGIN/COMMIT/ROLLBACK`
/// records around each transaction's lifetime. Clone-able; every clone shares
/// the same underlying WAL and active-transaction table.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Mutex<Inner>>,
    pool: BufferPool,
    locks: LockManager,
}

impl TransactionManager {
    pub fn new(wal: Wal, pool: BufferPool, locks: LockManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                wal,
                active: HashMap::new(),
                next_id: 1,
            })),
            pool,
            locks,
        }
    }

    /// Allocate the next transaction id, append `TRANSACTION BEGIN`, and add
    /// it to the active set.
    pub fn begin(&self) -> DbResult<Transaction> {
        let mut inner = self.inner.lock();
        let id = TxnId(inner.next_id);
        inner.next_id += 1;
        inner.wal.append(WalBody::Transaction {
            txn_id: id.0,
            operation: TxnOp::Begin,
        })?;
        inner.active.insert(
            id,
            TxnRecord {
                state: TxnState::Active,
                undo_log: Vec::new(),
            },
        );
        Ok(Transaction {
            id,
            state: TxnState::Active,
        })
    }

    /// Record the before-image of a page a transaction is about to mutate,
    /// so [`Self::rollback`] can restore it. Callers invoke this once per
    /// page before applying a write.
    pub fn record_undo(
        &self,
        txn_id: TxnId,
        file_id: FileId,
        page_id: PageId,
        before_image: Vec<u8>,
    ) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let record = inner.active.get_mut(&txn_id).ok_or_else(|| {
            DbError::Transaction(format!("{txn_id:?} is not active"))
        })?;
        record.undo_log.push(UndoEntry {
            file_id,
            page_id,
            before_image,
        });
        Ok(())
    }

    pub fn state(&self, txn_id: TxnId) -> Option<TxnState> {
        self.inner.lock().active.get(&txn_id).map(|r| r.state)
    }

    /// Append a `PAGE_WRITE` record for a page about to be forced to disk.
    /// Intended as the buffer pool's [`buffer::ForceRuleHook`] body: the pool
    /// calls this before writing a dirty page back, satisfying the
    /// write-ahead rule (the log record is durable before the page write).
    pub fn force_page_write(
        &self,
        file_name: &str,
        page_id: PageId,
        before_image: &[u8],
        after_image: &[u8],
    ) -> DbResult<u64> {
        let mut inner = self.inner.lock();
        inner.wal.force_page_write(0, file_name, page_id.0, before_image, after_image)
    }

    /// Flush the transaction's dirty pages (the write-ahead rule forces their
    /// WAL records first via the buffer pool's force hook), append
    /// `TRANSACTION COMMIT`, release every lock it holds, and drop it from
    /// the active set. A failure here aborts and rolls back instead; that
    /// rollback's own error is logged, never propagated past this call.
    pub fn commit(&self, txn_id: TxnId) -> DbResult<()> {
        match self.try_commit(txn_id) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(rollback_err) = self.rollback(txn_id) {
                    tracing::error!(
                        %rollback_err,
                        original_error = %err,
                        "rollback after a failed commit also failed"
                    );
                }
                Err(err)
            }
        }
    }

    fn try_commit(&self, txn_id: TxnId) -> DbResult<()> {
        {
            let inner = self.inner.lock();
            if !inner.active.contains_key(&txn_id) {
                return Err(DbError::Transaction(format!("{txn_id:?} is not active")));
            }
        }
        self.pool.flush_all()?;
        let mut inner = self.inner.lock();
        inner.wal.append(WalBody::Transaction {
            txn_id: txn_id.0,
            operation: TxnOp::Commit,
        })?;
        inner.active.remove(&txn_id);
        drop(inner);
        self.locks.release_all(txn_id);
        Ok(())
    }

    /// Walk the undo log in reverse, restoring each page's before-image,
    /// append `TRANSACTION ROLLBACK`, release every lock, and drop the
    /// transaction from the active set.
    pub fn rollback(&self, txn_id: TxnId) -> DbResult<()> {
        let undo_log = {
            let mut inner = self.inner.lock();
            let record = inner.active.get_mut(&txn_id).ok_or_else(|| {
                DbError::Transaction(format!("{txn_id:?} is not active"))
            })?;
            record.state = TxnState::Aborted;
            std::mem::take(&mut record.undo_log)
        };

        for entry in undo_log.into_iter().rev() {
            let pinned = self.pool.fetch(entry.file_id, entry.page_id)?;
            pinned.with_mut(|page| page.write_at(0, &entry.before_image))?;
        }

        let mut inner = self.inner.lock();
        inner.wal.append(WalBody::Transaction {
            txn_id: txn_id.0,
            operation: TxnOp::Rollback,
        })?;
        inner.active.remove(&txn_id);
        drop(inner);
        self.locks.release_all(txn_id);
        Ok(())
    }

    /// Roll back every still-active transaction. Used at shutdown; only the
    /// active set is consulted, there is no secondary ledger to reconcile.
    pub fn close_all(&self) {
        let ids: Vec<TxnId> = self.inner.lock().active.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.rollback(id) {
                tracing::error!(%err, txn_id = id.0, "rollback during shutdown failed");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// The highest LSN the underlying WAL has allocated so far.
    pub fn current_lsn(&self) -> u64 {
        self.inner.lock().wal.current_lsn()
    }

    /// Seal the WAL's current segment, returning the new checkpoint LSN.
    pub fn checkpoint(&self) -> DbResult<u64> {
        self.pool.flush_all()?;
        self.inner.lock().wal.checkpoint()
    }
}
