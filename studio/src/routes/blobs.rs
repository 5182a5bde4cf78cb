use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiQuery;
use crate::storage::validate_key;
use crate::AppState;

#[derive(Deserialize)]
pub struct SignedParams {
    pub method: Option<String>,
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// Upload target for URLs issued by `/api/files/signed-url`.
pub async fn signed_put(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ApiQuery(params): ApiQuery<SignedParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    validate_key(&key)?;
    let valid = match (params.method.as_deref(), params.expires, params.signature.as_deref()) {
        (Some(method @ "PUT"), Some(expires), Some(signature)) => {
            state.signer.verify(&key, method, expires, signature, chrono::Utc::now())
        }
        _ => false,
    };
    if !valid {
        tracing::warn!("Rejected signed upload for {}", key);
        return Err(ApiError::forbidden("Signature invalid or expired"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(mime::APPLICATION_OCTET_STREAM.as_ref())
        .to_string();
    let size = body.len();
    state.blobs.put(&key, body, &content_type).await?;
    tracing::info!("Signed upload stored {} ({} bytes)", key, size);

    Ok(Json(json!({ "key": key, "size": size, "contentType": content_type })))
}
