// P2P module - the HTTP wire between nodes
// axum router for inbound calls, reqwest client for outbound ones

mod client;
mod server;

pub use client::{HttpP2pClient, DEFAULT_REQUEST_TIMEOUT};
pub use server::{
    router, serve, ApiError, AppState, DeleteRequestJson, ReceiveRequestJson, ReceiveResponseJson,
    ResendRequestJson, SendRequestJson, SendResponseJson, SendSignedRequestJson, StoreRawRequestJson,
};
