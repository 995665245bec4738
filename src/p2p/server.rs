// HTTP surface of a node
//
// Peer-to-peer endpoints carry postcard bytes (application/octet-stream);
// the local transaction API and the resend request carry JSON.

use crate::identity::PublicKey;
use crate::payload::{MessageHash, PrivacyMode};
use crate::privacy::PrivacyError;
use crate::sync::{DirectoryError, PartyInfo, PeerDirectory, ProtocolError};
use crate::transaction::{
    ReceiveRequest, ResendRequest, ResendType, SendRequest, SendResponse, SendSignedRequest,
    TransactionError, TransactionManager,
};
use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TransactionManager>,
    pub directory: Arc<PeerDirectory>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Peer endpoints
        .route("/upcheck", get(upcheck_handler))
        .route("/push", post(push_handler))
        .route("/resend", post(resend_handler))
        .route("/resendbatch", post(resend_handler))
        .route("/partyinfo", post(party_info_handler))
        .route("/partyinfo/keys", get(party_info_keys_handler))
        // Directory administration
        .route("/partyinfo/excluded", get(excluded_keys_handler))
        .route("/partyinfo/remove", post(remove_recipient_handler))
        .route("/partyinfo/include", post(include_recipient_handler))
        // Local transaction API
        .route("/send", post(send_handler))
        .route("/sendsignedtx", post(send_signed_handler))
        .route("/storeraw", post(store_raw_handler))
        .route("/receive", post(receive_handler))
        .route("/delete", post(delete_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Node API listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ============================================================================
// ERRORS
// ============================================================================

/// An error rendered as `{"error": message}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        let status = match &err {
            TransactionError::Privacy(PrivacyError::PrivacyViolation(_)) => StatusCode::BAD_REQUEST,
            TransactionError::Privacy(PrivacyError::EnhancedPrivacyNotSupported(_)) => StatusCode::FORBIDDEN,
            TransactionError::Privacy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TransactionError::KeyNotFound(_)
            | TransactionError::RecipientKeyNotFound(_)
            | TransactionError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            TransactionError::ParticipantsMismatch(_)
            | TransactionError::InvalidPayload(_)
            | TransactionError::NotOwnMessage(_)
            | TransactionError::InvalidRequest(_)
            | TransactionError::Codec(_) => StatusCode::BAD_REQUEST,
            TransactionError::Storage(_) | TransactionError::Enclave(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        let status = match err {
            DirectoryError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            DirectoryError::AutoDiscoveryDisabled(_) => StatusCode::FORBIDDEN,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("Request failed: {}", self.message);
        }
        (self.status, axum::response::Json(json!({ "error": self.message }))).into_response()
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequestJson {
    pub public_key: String,
    #[serde(rename = "type")]
    pub resend_type: ResendType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerUrlJson {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestJson {
    /// Base64 of the plaintext
    pub payload: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub privacy_flag: u8,
    #[serde(default)]
    pub affected_contract_transactions: Vec<String>,
    #[serde(default)]
    pub exec_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSignedRequestJson {
    pub hash: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub privacy_flag: u8,
    #[serde(default)]
    pub affected_contract_transactions: Vec<String>,
    #[serde(default)]
    pub exec_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRawRequestJson {
    pub payload: String,
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponseJson {
    pub key: String,
    #[serde(default)]
    pub failed_recipients: Vec<String>,
}

impl From<SendResponse> for SendResponseJson {
    fn from(response: SendResponse) -> Self {
        Self {
            key: response.hash.to_base64(),
            failed_recipients: response
                .failures
                .iter()
                .map(|f| f.recipient.to_base64())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequestJson {
    pub key: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponseJson {
    pub payload: String,
    pub privacy_flag: u8,
    pub affected_contract_transactions: Vec<String>,
    pub exec_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequestJson {
    pub key: String,
}

fn parse_key(encoded: &str) -> Result<PublicKey, ApiError> {
    PublicKey::from_base64(encoded).map_err(|e| ApiError::bad_request(format!("Invalid public key {}: {}", encoded, e)))
}

fn parse_keys(encoded: &[String]) -> Result<Vec<PublicKey>, ApiError> {
    encoded.iter().map(|k| parse_key(k)).collect()
}

fn parse_hash(encoded: &str) -> Result<MessageHash, ApiError> {
    MessageHash::from_base64(encoded).map_err(|e| ApiError::bad_request(format!("Invalid hash {}: {}", encoded, e)))
}

fn parse_hashes(encoded: &[String]) -> Result<Vec<MessageHash>, ApiError> {
    encoded.iter().map(|h| parse_hash(h)).collect()
}

fn parse_bytes(encoded: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ApiError::bad_request(format!("Invalid base64: {}", e)))
}

fn parse_mode(flag: u8) -> Result<PrivacyMode, ApiError> {
    PrivacyMode::from_flag(flag).ok_or_else(|| ApiError::bad_request(format!("Unknown privacy flag {}", flag)))
}

fn octet_stream(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response()
}

// ============================================================================
// PEER HANDLERS
// ============================================================================

async fn upcheck_handler() -> &'static str {
    "I'm up!"
}

async fn push_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let hash = state.manager.store_payload(&body)?;
    debug!("Accepted push of {}", hash);
    Ok((StatusCode::CREATED, hash.to_base64()).into_response())
}

async fn resend_handler(
    State(state): State<AppState>,
    Json(request): Json<ResendRequestJson>,
) -> Result<Response, ApiError> {
    let request = ResendRequest {
        public_key: parse_key(&request.public_key)?,
        resend_type: request.resend_type,
        key: request.key.as_deref().map(parse_hash).transpose()?,
    };

    let response = state.manager.resend(request).await?;
    Ok(match response.payload {
        Some(payload) => octet_stream(StatusCode::OK, payload),
        None => StatusCode::OK.into_response(),
    })
}

async fn party_info_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let incoming = PartyInfo::from_bytes(&body)?;
    let unsaved = state.directory.find_unsaved_parties(&incoming).len();
    state.directory.store(&incoming)?;
    let learned = unsaved.saturating_sub(state.directory.find_unsaved_parties(&incoming).len());
    if learned > 0 {
        info!("Learned {} new parties from {}", learned, incoming.url);
    }
    let snapshot = state.directory.snapshot().to_bytes()?;
    Ok(octet_stream(StatusCode::OK, snapshot))
}

async fn party_info_keys_handler(State(state): State<AppState>) -> impl IntoResponse {
    let keys: Vec<_> = state
        .directory
        .snapshot()
        .recipients
        .iter()
        .map(|r| json!({ "key": r.key.to_base64() }))
        .collect();
    axum::response::Json(json!({ "keys": keys }))
}

async fn excluded_keys_handler(State(state): State<AppState>) -> impl IntoResponse {
    let keys: Vec<_> = state
        .directory
        .excluded_keys()
        .iter()
        .map(|key| json!({ "key": key.to_base64() }))
        .collect();
    axum::response::Json(json!({ "keys": keys }))
}

async fn remove_recipient_handler(
    State(state): State<AppState>,
    Json(request): Json<PeerUrlJson>,
) -> StatusCode {
    state.directory.remove_recipient(&request.url);
    StatusCode::NO_CONTENT
}

async fn include_recipient_handler(
    State(state): State<AppState>,
    Json(request): Json<PeerUrlJson>,
) -> impl IntoResponse {
    let keys: Vec<_> = state
        .directory
        .include_recipient(&request.url)
        .iter()
        .map(|r| json!({ "key": r.key.to_base64() }))
        .collect();
    axum::response::Json(json!({ "keys": keys }))
}

// ============================================================================
// LOCAL API HANDLERS
// ============================================================================

async fn send_handler(
    State(state): State<AppState>,
    Json(request): Json<SendRequestJson>,
) -> Result<Response, ApiError> {
    let request = SendRequest {
        sender: request.from.as_deref().map(parse_key).transpose()?,
        recipients: parse_keys(&request.to)?,
        payload: parse_bytes(&request.payload)?,
        privacy_mode: parse_mode(request.privacy_flag)?,
        affected_contract_transactions: parse_hashes(&request.affected_contract_transactions)?,
        exec_hash: request.exec_hash.into_bytes(),
    };

    let response = state.manager.send(request).await?;
    Ok((StatusCode::CREATED, axum::response::Json(SendResponseJson::from(response))).into_response())
}

async fn send_signed_handler(
    State(state): State<AppState>,
    Json(request): Json<SendSignedRequestJson>,
) -> Result<Response, ApiError> {
    let request = SendSignedRequest {
        hash: parse_hash(&request.hash)?,
        recipients: parse_keys(&request.to)?,
        privacy_mode: parse_mode(request.privacy_flag)?,
        affected_contract_transactions: parse_hashes(&request.affected_contract_transactions)?,
        exec_hash: request.exec_hash.into_bytes(),
    };

    let response = state.manager.send_signed(request).await?;
    Ok((StatusCode::CREATED, axum::response::Json(SendResponseJson::from(response))).into_response())
}

async fn store_raw_handler(
    State(state): State<AppState>,
    Json(request): Json<StoreRawRequestJson>,
) -> Result<Response, ApiError> {
    let from = request.from.as_deref().map(parse_key).transpose()?;
    let hash = state.manager.store_raw(&parse_bytes(&request.payload)?, from)?;
    Ok((StatusCode::OK, axum::response::Json(json!({ "key": hash.to_base64() }))).into_response())
}

async fn receive_handler(
    State(state): State<AppState>,
    Json(request): Json<ReceiveRequestJson>,
) -> Result<axum::response::Json<ReceiveResponseJson>, ApiError> {
    let request = ReceiveRequest {
        hash: parse_hash(&request.key)?,
        to: request.to.as_deref().map(parse_key).transpose()?,
        raw: request.raw,
    };

    let response = state.manager.receive(request)?;
    Ok(axum::response::Json(ReceiveResponseJson {
        payload: STANDARD.encode(&response.payload),
        privacy_flag: response.privacy_mode.flag(),
        affected_contract_transactions: response
            .affected_contract_transactions
            .iter()
            .map(MessageHash::to_base64)
            .collect(),
        exec_hash: String::from_utf8_lossy(&response.exec_hash).into_owned(),
    }))
}

async fn delete_handler(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequestJson>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete(&parse_hash(&request.key)?)?;
    Ok(StatusCode::NO_CONTENT)
}
