// Identity module - X25519 keys that name senders, recipients and directory entries

mod keys;

pub use keys::*;
