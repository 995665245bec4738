// Enclave module - WHO CAN READ WHAT
// Key custody and the sealing/unsealing of transaction payloads

mod keystore;
mod traits;

pub use keystore::{KeyStoreEnclave, NONCE_SIZE};
pub use traits::{Enclave, EnclaveError};
