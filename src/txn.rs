//! Transactions around document metadata updates.
//!
//! A [`Transaction`] stages operations; [`TransactionManager::commit_transaction`]
//! hands them to a [`CommitTarget`] in one call. If the target fails the
//! transaction is aborted and nothing it staged becomes visible.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Result, XmldexError};
use crate::metadata::DocumentMetadata;

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and accepting operations.
    Active,
    /// Transaction is being prepared for commit.
    Preparing,
    /// Transaction is committed.
    Committed,
    /// Transaction is aborted/rolled back.
    Aborted,
}

/// A single transaction operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOperation {
    /// Replace the metadata of the document at `path`.
    StoreMetadata {
        path: String,
        metadata: DocumentMetadata,
    },
}

/// Receives the operations of a committing transaction.
pub trait CommitTarget: Send + Sync {
    /// Make every operation durable and visible, or none of them.
    fn apply(&self, transaction_id: &str, operations: &[TransactionOperation]) -> Result<()>;
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Transaction metadata and operations.
#[derive(Debug)]
pub struct Transaction {
    /// Unique transaction ID.
    pub id: String,
    /// Current state of the transaction.
    pub state: TransactionState,
    /// Start timestamp.
    pub start_time: u64,
    /// Operations in this transaction.
    pub operations: Vec<TransactionOperation>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            state: TransactionState::Active,
            start_time: now_ms(),
            operations: Vec::new(),
        }
    }

    pub fn add_operation(&mut self, operation: TransactionOperation) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(XmldexError::transaction(
                "Cannot add operations to inactive transaction",
            ));
        }
        self.operations.push(operation);
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(XmldexError::transaction("Cannot prepare inactive transaction"));
        }
        self.state = TransactionState::Preparing;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.state != TransactionState::Preparing {
            return Err(XmldexError::transaction("Cannot commit unprepared transaction"));
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn abort(&mut self) -> Result<()> {
        if self.state == TransactionState::Committed {
            return Err(XmldexError::transaction("Cannot abort committed transaction"));
        }
        self.state = TransactionState::Aborted;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Get transaction duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        now_ms().saturating_sub(self.start_time)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a transaction commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Number of operations applied.
    pub operations_applied: usize,
    /// Time taken for commit (milliseconds).
    pub commit_time_ms: u64,
}

/// Tracks active transactions and drives commits.
#[derive(Debug, Default)]
pub struct TransactionManager {
    active_transactions: RwLock<AHashMap<String, Arc<Mutex<Transaction>>>>,
    transaction_counter: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_transaction(&self) -> Arc<Mutex<Transaction>> {
        let transaction = Arc::new(Mutex::new(Transaction::new()));
        let transaction_id = transaction.lock().id.clone();

        self.transaction_counter.fetch_add(1, Ordering::Relaxed);
        self.active_transactions
            .write()
            .insert(transaction_id.clone(), Arc::clone(&transaction));

        tracing::debug!(target: "xmldex::txn", txn = %transaction_id, "transaction started");
        transaction
    }

    /// Prepare `transaction`, apply its operations to `target` and commit.
    ///
    /// On failure the transaction is aborted and the error returned.
    pub fn commit_transaction(
        &self,
        transaction: &Arc<Mutex<Transaction>>,
        target: &dyn CommitTarget,
    ) -> Result<TransactionResult> {
        let started = now_ms();
        let (transaction_id, operations) = {
            let mut txn = transaction.lock();
            txn.prepare()?;
            (txn.id.clone(), txn.operations.clone())
        };

        match target.apply(&transaction_id, &operations) {
            Ok(()) => {
                transaction.lock().commit()?;
                self.active_transactions.write().remove(&transaction_id);

                tracing::debug!(
                    target: "xmldex::txn",
                    txn = %transaction_id,
                    operations = operations.len(),
                    "transaction committed"
                );
                Ok(TransactionResult {
                    operations_applied: operations.len(),
                    commit_time_ms: now_ms().saturating_sub(started),
                })
            }
            Err(err) => {
                tracing::warn!(
                    target: "xmldex::txn",
                    txn = %transaction_id,
                    error = %err,
                    "commit failed, transaction aborted"
                );
                self.rollback_transaction(transaction)?;
                Err(XmldexError::transaction(format!(
                    "transaction {transaction_id} aborted: {err}"
                )))
            }
        }
    }

    /// Abort `transaction`, discarding its operations.
    pub fn rollback_transaction(&self, transaction: &Arc<Mutex<Transaction>>) -> Result<()> {
        let transaction_id = {
            let mut txn = transaction.lock();
            txn.abort()?;
            txn.operations.clear();
            txn.id.clone()
        };
        self.active_transactions.write().remove(&transaction_id);
        Ok(())
    }

    pub fn active_transaction_count(&self) -> usize {
        self.active_transactions.read().len()
    }

    pub fn total_transaction_count(&self) -> u64 {
        self.transaction_counter.load(Ordering::Relaxed)
    }

    pub fn get_transaction(&self, transaction_id: &str) -> Option<Arc<Mutex<Transaction>>> {
        self.active_transactions.read().get(transaction_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        applied: Mutex<Vec<TransactionOperation>>,
    }

    impl CommitTarget for Recorder {
        fn apply(&self, _transaction_id: &str, operations: &[TransactionOperation]) -> Result<()> {
            if self.fail {
                return Err(XmldexError::storage("disk full"));
            }
            self.applied.lock().extend_from_slice(operations);
            Ok(())
        }
    }

    fn store_op(path: &str) -> TransactionOperation {
        TransactionOperation::StoreMetadata {
            path: path.to_string(),
            metadata: DocumentMetadata::new(),
        }
    }

    #[test]
    fn test_transaction_state_machine() {
        let mut txn = Transaction::new();
        assert!(txn.is_active());
        assert!(!txn.id.is_empty());
        assert!(txn.commit().is_err());

        assert!(txn.prepare().is_ok());
        assert_eq!(txn.state, TransactionState::Preparing);
        assert!(txn.add_operation(store_op("/db/a.xml")).is_err());

        assert!(txn.commit().is_ok());
        assert_eq!(txn.state, TransactionState::Committed);
        assert!(txn.abort().is_err());
    }

    #[test]
    fn test_commit_applies_operations() {
        let manager = TransactionManager::new();
        let target = Recorder::default();

        let txn = manager.begin_transaction();
        assert_eq!(manager.active_transaction_count(), 1);
        txn.lock().add_operation(store_op("/db/a.xml")).unwrap();

        let id = txn.lock().id.clone();
        assert!(manager.get_transaction(&id).is_some());

        let result = manager.commit_transaction(&txn, &target).unwrap();
        assert_eq!(result.operations_applied, 1);
        assert_eq!(txn.lock().state, TransactionState::Committed);
        assert_eq!(manager.active_transaction_count(), 0);
        assert_eq!(manager.total_transaction_count(), 1);
        assert_eq!(target.applied.lock().len(), 1);
    }

    #[test]
    fn test_failed_commit_aborts() {
        let manager = TransactionManager::new();
        let target = Recorder {
            fail: true,
            ..Recorder::default()
        };

        let txn = manager.begin_transaction();
        txn.lock().add_operation(store_op("/db/a.xml")).unwrap();

        let err = manager.commit_transaction(&txn, &target).unwrap_err();
        assert!(matches!(err, XmldexError::Transaction(_)));
        assert_eq!(txn.lock().state, TransactionState::Aborted);
        assert!(txn.lock().operations.is_empty());
        assert_eq!(manager.active_transaction_count(), 0);
    }

    #[test]
    fn test_transaction_duration() {
        let txn = Transaction::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(txn.duration_ms() >= 10);
    }
}
