//! Shared sled plumbing: tree names and CBOR record helpers
use super::error::WorkflowError;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};

pub const CLIENTS_TREE: &str = "clients";
pub const INSTALLMENTS_TREE: &str = "installments";
pub const INSTALLMENT_INDEX_TREE: &str = "installment_index";
pub const PAYMENTS_TREE: &str = "payments";
pub const OUTBOX_TREE: &str = "notification_outbox";
pub const NOTIFICATIONS_TREE: &str = "notifications";

/// A value stored as CBOR in one of the trees
pub trait Record: Sized + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    fn to_cbor(&self) -> Result<Vec<u8>, WorkflowError> {
        minicbor::to_vec(self).map_err(|e| WorkflowError::Codec(e.to_string()))
    }
    fn from_cbor(bytes: &[u8]) -> Result<Self, WorkflowError> {
        minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
    }
}

/// Read and decode a record from a plain tree
pub fn get_record<R: Record>(tree: &sled::Tree, key: &[u8]) -> Result<Option<R>, WorkflowError> {
    match tree.get(key)? {
        Some(bytes) => R::from_cbor(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Decode every value of a tree, in key order
pub fn scan_records<R: Record>(tree: &sled::Tree) -> Result<Vec<R>, WorkflowError> {
    tree.iter()
        .values()
        .map(|value| R::from_cbor(&value?))
        .collect()
}

/// Read and decode a record from inside a transaction. Decoding failures
/// abort the transaction.
pub fn tx_get<R: Record>(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<R>, WorkflowError> {
    match tree.get(key)? {
        Some(bytes) => match R::from_cbor(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => abort(err),
        },
        None => Ok(None),
    }
}

pub fn tx_put<R: Record>(
    tree: &TransactionalTree,
    key: &[u8],
    record: &R,
) -> ConflictableTransactionResult<(), WorkflowError> {
    match record.to_cbor() {
        Ok(bytes) => {
            tree.insert(key, bytes)?;
            Ok(())
        }
        Err(err) => abort(err),
    }
}
