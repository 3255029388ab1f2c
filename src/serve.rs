use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, warn};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServiceConfig;
use crate::constants::MAX_UPLOAD_BYTES;
use crate::error::{DetectError, ErrorKind};
use crate::model::OwnerId;
use crate::service::{DetectionService, PageQuery, PhotoUpload, ReportDetectionRequest};

/// Header carrying the owner id, set by the authenticating proxy in front of this service
pub const OWNER_HEADER: &str = "x-owner-id";

// State for API handlers
pub struct AppState {
    pub service: DetectionService,
}

/// Failure returned by a handler, rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    MissingOwner,
    Detect(DetectError),
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        ApiError::Detect(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingOwner => (
                StatusCode::UNAUTHORIZED,
                format!("Missing or invalid {} header", OWNER_HEADER),
            ),
            ApiError::Detect(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::StorageUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!("Request failed: {}", err);
                    (
                        status,
                        "Server error. Something went wrong, working on it".to_string(),
                    )
                } else {
                    (status, err.to_string())
                }
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Verified owner of the request
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::MissingOwner)?;
        OwnerId::parse(raw)
            .map(Owner)
            .map_err(|_| ApiError::MissingOwner)
    }
}

/// Build the HTTP routes around a service
pub fn router(service: DetectionService) -> Router {
    let state = Arc::new(AppState { service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/detect", get(list_detections_handler))
        .route("/detect/get/{id}", get(get_detection_handler))
        .route("/detect/camera/add", post(add_camera_handler))
        .route("/detect/report", post(report_detection_handler))
        .route("/detect/photo", post(upload_photo_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Run the API server until it fails
pub fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting detection intake server");
    println!("Photo root: {}", config.files_dir.display());
    println!("Database: {}", config.database.display());
    println!("Quiescence delay: {} seconds", config.quiescence_secs);
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", config.api_port);
    println!("Endpoints:");
    println!("  GET  /health  - Health check");
    println!("  POST /detect/camera/add  - Register a camera");
    println!("  POST /detect/report  - Open a detection session");
    println!("  POST /detect/photo  - Upload a photo (multipart: detection_id, file, last)");
    println!("  GET  /detect?page=<N>&per_page=<N>  - List detection sessions");
    println!("  GET  /detect/get/:id  - Detection session detail");

    // Create tokio runtime and run server
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let service = DetectionService::from_config(&config)
            .await
            .map_err(|e| format!("Failed to start service: {}", e))?;
        let app = router(service);

        let listener = tokio::net::TcpListener::bind(format!("[::]:{}", config.api_port))
            .await
            .map_err(|e| format!("Failed to bind to port {}: {}", config.api_port, e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

// Health check endpoint - returns 200 OK if server is running
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn add_camera_handler(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.service.register_camera(&owner).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn report_detection_handler(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(request): Json<ReportDetectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reported = state.service.report_detection(&owner, &request).await?;
    Ok((StatusCode::CREATED, Json(reported)))
}

async fn upload_photo_handler(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_photo_upload(multipart).await?;
    let uploaded = state.service.upload_photo(&owner, &upload).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn list_detections_handler(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = state.service.list_detections(&owner, query).await?;
    Ok(Json(listing))
}

async fn get_detection_handler(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.service.get_detection(&owner, id).await?;
    Ok(Json(detail))
}

/// Collect the multipart form into a `PhotoUpload`; unknown fields are skipped
async fn read_photo_upload(mut multipart: Multipart) -> Result<PhotoUpload, ApiError> {
    let mut upload = PhotoUpload::default();

    let bad_form = |e: axum::extract::multipart::MultipartError| {
        ApiError::Detect(DetectError::Validation(format!("Malformed upload: {}", e)))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_ascii_lowercase();
        match name.as_str() {
            "detection_id" => {
                let text = field.text().await.map_err(bad_form)?;
                let id = text.trim().parse::<i64>().map_err(|_| {
                    DetectError::Validation(format!("Invalid detection id '{}'", text))
                })?;
                upload.detection_id = Some(id);
            }
            "file" => {
                upload.filename = field.file_name().map(str::to_string);
                upload.bytes = field.bytes().await.map_err(bad_form)?;
            }
            "last" => {
                let text = field.text().await.map_err(bad_form)?;
                upload.last = is_truthy(&text);
            }
            other => {
                warn!("Ignoring unexpected upload field '{}'", other);
            }
        }
    }

    Ok(upload)
}

/// Any non-empty value other than an explicit false marks the photo as last
fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("  "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("False"));
    }
}
