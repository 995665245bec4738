// Payload module - the encrypted transaction as it travels between nodes

mod codec;
mod model;

pub use codec::*;
pub use model::*;
