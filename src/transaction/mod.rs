// Transaction module - WHAT HAPPENS TO A TRANSACTION
// Encrypting, storing, publishing, resending and receiving payloads

mod manager;
mod publisher;
mod request;
mod resend;

pub use manager::{TransactionError, TransactionManager, DEFAULT_RESEND_FETCH_SIZE};
pub use publisher::{MockPayloadPublisher, PayloadPublisher, PublishError};
pub use request::{
    PublishFailure, ReceiveRequest, ReceiveResponse, ResendRequest, ResendResponse, ResendType,
    SendRequest, SendResponse, SendSignedRequest,
};
pub use resend::ResendManager;
