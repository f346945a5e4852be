use actix_multipart::{
    form::{tempfile::TempFile, MultipartFormConfig},
    MultipartError,
};
use actix_web::{
    body::MessageBody,
    dev::ServiceResponse,
    error::{InternalError, JsonPayloadError},
    get,
    guard::GuardContext,
    http::header::CONTENT_TYPE,
    middleware::ErrorHandlerResponse,
    web, Error, HttpRequest, HttpResponse,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{media::MediaFile, AppState};

pub mod accident;
pub mod upload;

// Room for the multipart framing and the `accident` text field.
const MULTIPART_OVERHEAD: usize = 256 * 1024;

/// The `{success, message, data, error}` envelope every accident endpoint
/// answers with.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "OK".to_string(),
        message: "Incident map API is running".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Body limits `(json, multipart)` derived from the largest accepted image.
/// Inline base64 images travel inside the JSON body.
fn body_limits(max_upload_bytes: usize) -> (usize, usize) {
    (
        max_upload_bytes.saturating_mul(2),
        max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
    )
}

/// Registers state, extractor limits and every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig, state: web::Data<AppState>) {
    let (json_limit, multipart_limit) = body_limits(state.max_upload_bytes);

    cfg.app_data(state)
        .app_data(
            web::JsonConfig::default()
                .limit(json_limit)
                .error_handler(json_error_handler),
        )
        .app_data(
            MultipartFormConfig::default()
                .total_limit(multipart_limit)
                .error_handler(multipart_error_handler),
        )
        .service(
            web::scope("/api")
                .service(health)
                .service(accident::export_accidents)
                .service(accident::get_accidents)
                .service(accident::create_accident_multipart)
                .service(accident::create_accident)
                .service(accident::restore_accidents)
                .service(accident::import_accidents)
                .service(accident::delete_accident)
                .service(upload::upload_image),
        );
}

pub fn is_multipart(ctx: &GuardContext) -> bool {
    ctx.head()
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

fn json_error_handler(error: JsonPayloadError, _req: &HttpRequest) -> Error {
    let response = match &error {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            HttpResponse::PayloadTooLarge()
        }
        _ => HttpResponse::BadRequest(),
    }
    .json(ApiResponse::failure(format!("Invalid JSON body: {error}")));

    InternalError::from_response(error, response).into()
}

fn multipart_error_handler(error: MultipartError, _req: &HttpRequest) -> Error {
    let response =
        HttpResponse::BadRequest().json(ApiResponse::failure(format!("Invalid form data: {error}")));

    InternalError::from_response(error, response).into()
}

/// Error-handler middleware hook: a 500 that does not already carry JSON is
/// replaced by a `{success: false, error}` envelope.
pub fn render_internal_error<B: MessageBody>(
    res: ServiceResponse<B>,
) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let is_json = res
        .response()
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if is_json {
        return Ok(ErrorHandlerResponse::Response(res.map_into_left_body()));
    }

    let (req, _) = res.into_parts();
    let response =
        HttpResponse::InternalServerError().json(ApiResponse::failure("Internal server error"));

    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, response).map_into_right_body(),
    ))
}

/// Reads a multipart temp file fully into memory.
pub(crate) async fn read_upload(file: TempFile) -> std::io::Result<MediaFile> {
    let bytes = tokio::fs::read(file.file.path()).await?;

    Ok(MediaFile {
        file_name: file.file_name,
        content_type: file.content_type.map(|mime| mime.essence_str().to_string()),
        bytes,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use actix_web::{
        http::StatusCode,
        middleware::ErrorHandlers,
        test::{self, TestRequest},
        App,
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::IdPolicy,
        database::FileRecordStore,
        media::{MediaError, MediaUploader, UploadedMedia},
        service::AccidentService,
    };

    pub(crate) struct StubUploader {
        pub fail: bool,
    }

    #[async_trait]
    impl MediaUploader for StubUploader {
        async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, MediaError> {
            if self.fail {
                return Err(MediaError::Upstream("stubbed failure".to_string()));
            }
            let name = file.file_name.unwrap_or_else(|| "image".to_string());
            Ok(UploadedMedia {
                url: format!("https://media.example/{folder}/{name}"),
                public_id: format!("{folder}/{name}"),
            })
        }
    }

    pub(crate) struct TestContext {
        pub state: web::Data<AppState>,
        pub dir: std::path::PathBuf,
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    pub(crate) fn context(require_fields: bool, failing_uploader: bool) -> TestContext {
        let dir = std::env::temp_dir().join(format!(
            "incident_map_routes_{}",
            Uuid::new_v4().simple()
        ));
        let restore_target = serde_json::from_value(serde_json::json!([
            { "id": 1, "nombre": "Seed", "tipo": "Deslave", "descripcion": "seed" }
        ]))
        .unwrap();
        let state = web::Data::new(AppState {
            accidents: AccidentService::new(
                Arc::new(FileRecordStore::new(dir.join("accidents.json"))),
                IdPolicy::Timestamp,
                restore_target,
            ),
            uploader: Arc::new(StubUploader {
                fail: failing_uploader,
            }),
            media_folder: "accidentes".to_string(),
            max_upload_bytes: 1024 * 1024,
            require_fields,
        });
        TestContext { state, dir }
    }

    /// Builds a `multipart/form-data` body. Each part is
    /// `(name, file name, content type, bytes)`.
    pub(crate) fn multipart_body(
        boundary: &str,
        parts: &[(&str, Option<&str>, &str, &[u8])],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, content_type, bytes) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            let disposition = match file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                ),
                None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n"),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let ctx = context(false, false);
        let app =
            test::init_service(App::new().configure(|cfg| configure(cfg, ctx.state.clone()))).await;

        let res = test::call_service(&app, TestRequest::get().uri("/api/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let body: HealthResponse = test::read_body_json(res).await;
        assert_eq!(body.status, "OK");
        assert!(body.timestamp.ends_with('Z'));
    }

    #[actix_web::test]
    async fn plain_internal_errors_get_a_json_envelope() {
        let app = test::init_service(
            App::new()
                .wrap(
                    ErrorHandlers::new()
                        .handler(StatusCode::INTERNAL_SERVER_ERROR, render_internal_error),
                )
                .route(
                    "/boom",
                    web::get().to(|| async { HttpResponse::InternalServerError().body("boom") }),
                )
                .route(
                    "/enveloped",
                    web::get().to(|| async {
                        HttpResponse::InternalServerError().json(ApiResponse::failure("kept"))
                    }),
                ),
        )
        .await;

        let res = test::call_service(&app, TestRequest::get().uri("/boom").to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiResponse<()> = test::read_body_json(res).await;
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("Internal server error"));

        let res = test::call_service(&app, TestRequest::get().uri("/enveloped").to_request()).await;
        let body: ApiResponse<()> = test::read_body_json(res).await;
        assert_eq!(body.error.as_deref(), Some("kept"));
    }

    #[test]
    fn body_limits_saturate_instead_of_overflowing() {
        assert_eq!(
            body_limits(1024 * 1024),
            (2 * 1024 * 1024, 1024 * 1024 + MULTIPART_OVERHEAD)
        );
        assert_eq!(body_limits(usize::MAX), (usize::MAX, usize::MAX));
    }

    #[actix_web::test]
    async fn huge_upload_limit_still_serves() {
        let ctx = context(false, false);
        let state = web::Data::new(AppState {
            accidents: AccidentService::new(
                Arc::new(FileRecordStore::new(ctx.dir.join("accidents.json"))),
                IdPolicy::Timestamp,
                Vec::new(),
            ),
            uploader: Arc::new(StubUploader { fail: false }),
            media_folder: "accidentes".to_string(),
            max_upload_bytes: usize::MAX,
            require_fields: false,
        });
        let app = test::init_service(App::new().configure(|cfg| configure(cfg, state.clone()))).await;

        let res = test::call_service(&app, TestRequest::get().uri("/api/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn envelope_omits_empty_parts() {
        let value = serde_json::to_value(ApiResponse::failure("nope")).unwrap();

        assert_eq!(value, serde_json::json!({ "success": false, "error": "nope" }));
    }
}
