//! Chat backend JWT minting.
//!
//! The backend authenticates websocket and REST calls with HS256 JWTs signed
//! by the application secret. User tokens carry `user_id`; server tokens
//! carry `server: true` and authorize the REST surface.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use chatrelay_core::error::ChatError;

type HmacSha256 = Hmac<Sha256>;

/// Mint a token that lets `user_id` open a realtime connection.
pub fn create_user_token(api_secret: &str, user_id: &str) -> Result<String, ChatError> {
    sign(api_secret, &serde_json::json!({ "user_id": user_id }))
}

/// Mint the server-side token used for REST calls.
pub fn create_server_token(api_secret: &str) -> Result<String, ChatError> {
    sign(api_secret, &serde_json::json!({ "server": true }))
}

fn sign(api_secret: &str, claims: &serde_json::Value) -> Result<String, ChatError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(claims).map_err(|e| ChatError::TokenSigning(e.to_string()))?,
    );
    let signing_input = format!("{header}.{payload}");

    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| ChatError::TokenSigning(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}
