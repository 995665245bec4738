// Privacy module - consistency of privacy modes and recipient sets across dependent transactions

mod validator;

pub use validator::{PrivacyError, PrivacyHelper};
