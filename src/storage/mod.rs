// Storage module - content-addressed persistence for transactions

mod store;

pub use store::{MeshStore, RawTransactionStore, StoreError, StoredTransaction, TransactionStore};
