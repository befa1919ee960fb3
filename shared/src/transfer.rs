use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capabilities::api::{ApiEndpoint, ApiOperation, ApiResult, ErrorBody};
use crate::config::SessionConfig;
use crate::error::{AppError, ErrorKind};
use crate::geometry::Region;
use crate::image_processing::{self, JPEG_MIME};
use crate::resource::ImageHandle;

#[derive(Debug, Deserialize)]
struct CropConfirmResponse {
    success: bool,
    #[serde(default)]
    filename: Option<String>,
}

pub const EXPORT_PATH: &str = "process";

#[derive(Debug, Serialize)]
struct ExportRequest<'a> {
    filename: &'a str,
    shop_name: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub type ExportResult = crux_http::Result<crux_http::Response<ExportResponse>>;

pub fn endpoint_url(config: &SessionConfig, path: &str) -> Result<String, AppError> {
    config
        .resolve_url(path)
        .map(String::from)
        .ok_or_else(|| {
            AppError::new(ErrorKind::Network, "API address is not configured")
                .with_context("api_base", config.api_base.clone())
        })
}

/// Crop the source to `region` for upload. Falls back to the full raw file
/// when the source could not be decoded or the crop fails.
pub fn crop_upload(
    handle: &ImageHandle,
    region: &Region,
    config: &SessionConfig,
) -> Result<ApiOperation, AppError> {
    let url = endpoint_url(config, ApiEndpoint::ConfirmCrop.path())?;
    let (bytes, mime_type) = match handle.pixels() {
        Some(pixels) => match image_processing::crop_to_region(pixels, region, config.jpeg_quality) {
            Ok(bytes) => (bytes, JPEG_MIME),
            Err(e) => {
                warn!(error = %e, "crop failed, uploading raw file");
                (handle.raw().to_vec(), image_processing::sniff_mime(handle.raw()))
            }
        },
        None => (handle.raw().to_vec(), image_processing::sniff_mime(handle.raw())),
    };
    Ok(ApiOperation::file(
        ApiEndpoint::ConfirmCrop,
        url,
        handle.file_name(),
        mime_type,
        bytes,
    ))
}

/// URL and JSON body of the export call.
pub fn export_request(
    file_id: &str,
    label: &str,
    config: &SessionConfig,
) -> Result<(String, Vec<u8>), AppError> {
    let url = endpoint_url(config, EXPORT_PATH)?;
    let body = serde_json::to_vec(&ExportRequest {
        filename: file_id,
        shop_name: label,
    })
    .map_err(|e| {
        AppError::new(ErrorKind::Export, "Could not prepare the export request.")
            .with_internal(e.to_string())
    })?;
    Ok((url, body))
}

/// The accepted file id, or why the server refused the crop.
pub fn interpret_crop(result: ApiResult) -> Result<String, AppError> {
    let response = result?;
    if !response.is_success() {
        let message = response
            .json::<ErrorBody>()
            .map(|b| b.error)
            .unwrap_or_else(|_| "The server did not accept the cropped image.".to_string());
        return Err(AppError::new(ErrorKind::Server, message)
            .with_context("status", response.status.to_string()));
    }
    let body: CropConfirmResponse = response.json()?;
    match body.filename.filter(|f| !f.trim().is_empty()) {
        Some(filename) if body.success => Ok(filename),
        _ => Err(AppError::new(
            ErrorKind::Server,
            "The server did not accept the cropped image.",
        )),
    }
}

/// The absolute URL of the finished artifact. Server error text is kept verbatim.
pub fn interpret_export(result: ExportResult, config: &SessionConfig) -> Result<String, AppError> {
    let mut response = result.map_err(|e| {
        AppError::new(ErrorKind::Network, "Could not reach the export service.")
            .with_internal(e.to_string())
    })?;
    let status = response.status();
    let body = response.take_body();

    if let Some(ExportResponse {
        error: Some(message),
        ..
    }) = &body
    {
        return Err(AppError::new(ErrorKind::Export, message.clone())
            .with_context("status", status.to_string()));
    }
    if !status.is_success() {
        return Err(AppError::new(
            ErrorKind::Export,
            format!("Export failed (status {status})."),
        ));
    }

    let raw = body
        .and_then(|b| b.result_url)
        .ok_or_else(|| AppError::new(ErrorKind::Export, "Export returned no result."))?;
    config
        .resolve_url(&raw)
        .map(String::from)
        .ok_or_else(|| {
            AppError::new(ErrorKind::Export, "Export returned an invalid result address.")
                .with_internal(raw)
        })
}
