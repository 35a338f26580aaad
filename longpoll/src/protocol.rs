//! JSON bodies of the HTTP long-poll endpoint.

use crate::checksums::{ClientChecksums, PayloadChecksums};
use crate::errors::ResolveError;
use crate::payload::{CompressionType, ConfigResponse};
use crate::request::RequestParams;
use crate::types::{ConfigKey, Generation, PlatformVersion};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_PATH: &str = "/config/v1/get";

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub namespace: String,
    pub name: String,
    pub config_id: String,
    pub client_hostname: String,
    #[serde(default)]
    pub generation: Generation,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub xxhash64: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub version: Option<PlatformVersion>,
}

impl From<WireRequest> for RequestParams {
    fn from(wire: WireRequest) -> Self {
        RequestParams {
            key: ConfigKey::new(wire.namespace, wire.name, wire.config_id),
            client_hostname: wire.client_hostname,
            version: wire.version,
            checksums: ClientChecksums {
                xxhash64: wire.xxhash64,
                md5: wire.md5,
            },
            generation: wire.generation,
            timeout: Duration::from_millis(wire.timeout_ms),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    pub generation: Generation,
    pub apply_on_restart: bool,
    pub checksums: WireChecksums,
    pub compression: CompressionType,
    pub uncompressed_size: usize,
    /// Base64 of the (possibly compressed) payload
    pub payload: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WireChecksums {
    pub xxhash64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl From<&PayloadChecksums> for WireChecksums {
    fn from(checksums: &PayloadChecksums) -> Self {
        WireChecksums {
            xxhash64: checksums.primary().to_string(),
            md5: checksums.legacy().map(str::to_string),
        }
    }
}

impl From<&ConfigResponse> for WireResponse {
    fn from(response: &ConfigResponse) -> Self {
        WireResponse {
            generation: response.generation,
            apply_on_restart: response.apply_on_restart,
            checksums: (&response.checksums).into(),
            compression: response.envelope.compression(),
            uncompressed_size: response.envelope.uncompressed_size(),
            payload: STANDARD.encode(response.envelope.data()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    /// Stable classification, e.g. `unknown_definition`
    pub error: String,
    /// HTTP status code
    pub code: u16,
    pub message: String,
}

impl WireError {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        WireError {
            error: error.to_string(),
            code: status.as_u16(),
            message: message.into(),
        }
    }
}

impl From<&ResolveError> for WireError {
    fn from(e: &ResolveError) -> Self {
        WireError::new(status_for(e), e.as_str(), e.to_string())
    }
}

pub fn status_for(e: &ResolveError) -> StatusCode {
    match e {
        ResolveError::InvalidRequest(_)
        | ResolveError::IllegalConfigId { .. }
        | ResolveError::UnknownDefinition(_) => StatusCode::BAD_REQUEST,
        ResolveError::ApplicationNotLoaded { .. } | ResolveError::UnknownVersion { .. } => {
            StatusCode::NOT_FOUND
        }
        ResolveError::IncompatibleVersion { .. } => StatusCode::CONFLICT,
        ResolveError::Overload => StatusCode::SERVICE_UNAVAILABLE,
        ResolveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
