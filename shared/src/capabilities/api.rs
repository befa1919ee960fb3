use std::fmt;

use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{AppError, ErrorKind};

pub const ANALYZE_TIMEOUT_MS: u64 = 60_000;
pub const CONFIRM_CROP_TIMEOUT_MS: u64 = 60_000;
pub const MAX_RESPONSE_BODY_SIZE: usize = 1024 * 1024;

/// Endpoints that take a multipart file upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiEndpoint {
    Analyze,
    ConfirmCrop,
}

impl ApiEndpoint {
    pub const fn path(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::ConfirmCrop => "confirm-crop",
        }
    }

    pub const fn timeout_ms(self) -> u64 {
        match self {
            Self::Analyze => ANALYZE_TIMEOUT_MS,
            Self::ConfirmCrop => CONFIRM_CROP_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// One multipart POST the shell performs on the core's behalf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiOperation {
    pub endpoint: ApiEndpoint,
    pub url: String,
    pub part: FilePart,
    pub timeout_ms: u64,
}

impl ApiOperation {
    pub fn file(
        endpoint: ApiEndpoint,
        url: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            endpoint,
            url: url.into(),
            part: FilePart {
                field: "file".to_string(),
                file_name: file_name.into(),
                mime_type: mime_type.into(),
                bytes,
            },
            timeout_ms: endpoint.timeout_ms(),
        }
    }
}

impl Operation for ApiOperation {
    type Output = ApiResult;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(ApiError::Decode {
                reason: format!("response body too large: {} bytes", self.body.len()),
            });
        }
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Decode {
            reason: e.to_string(),
        })
    }
}

/// `{ "error": "..." }` as returned by every endpoint on failure.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("could not decode response: {reason}")]
    Decode { reason: String },
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        let kind = match &e {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Decode { .. } => ErrorKind::Server,
        };
        let message = match kind {
            ErrorKind::Server => "Unexpected response from server".to_string(),
            _ => e.to_string(),
        };
        AppError::new(kind, message).with_internal(e.to_string())
    }
}

pub type ApiResult = Result<ApiResponse, ApiError>;

#[derive(Capability)]
pub struct Api<Ev> {
    context: CapabilityContext<ApiOperation, Ev>,
}

impl<Ev> Api<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<ApiOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn send<F>(&self, operation: ApiOperation, callback: F)
    where
        F: FnOnce(ApiResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(operation).await;
            ctx.update_app(callback(result));
        });
    }
}
