use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::read_upload;
use crate::AppState;

#[derive(Debug, MultipartForm)]
pub struct ImageMultipartRequest {
    #[multipart(rename = "image")]
    pub image: Option<TempFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub url: String,
    pub public_id: String,
}

#[post("/upload")]
pub async fn upload_image(
    state: web::Data<AppState>,
    form: MultipartForm<ImageMultipartRequest>,
) -> HttpResponse {
    let image = match form.into_inner().image {
        Some(image) => image,
        None => return HttpResponse::BadRequest().json(json!({ "error": "No image file provided" })),
    };

    let file = match read_upload(image).await {
        Ok(file) => file,
        Err(error) => {
            log::error!("Failed to read uploaded image: {error}");
            return HttpResponse::InternalServerError()
                .json(json!({ "error": "Could not read the uploaded image" }));
        }
    };

    match state.uploader.upload(file, &state.media_folder).await {
        Ok(media) => HttpResponse::Ok().json(UploadResponse {
            message: "Image uploaded".to_string(),
            url: media.url,
            public_id: media.public_id,
        }),
        Err(error) if error.is_client_error() => {
            HttpResponse::BadRequest().json(json!({ "error": error.to_string() }))
        }
        Err(error) => {
            log::error!("Image upload failed: {error}");
            HttpResponse::InternalServerError().json(json!({ "error": error.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{
        http::{header, StatusCode},
        test::{self, TestRequest},
        App,
    };

    use super::*;
    use crate::routes::{
        configure,
        tests::{context, multipart_body},
    };

    const BOUNDARY: &str = "----incidentmapupload";

    fn upload_request(body: Vec<u8>) -> TestRequest {
        TestRequest::post()
            .uri("/api/upload")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn returns_the_hosted_url() {
        let ctx = context(false, false);
        let app =
            test::init_service(App::new().configure(|cfg| configure(cfg, ctx.state.clone()))).await;
        let body = multipart_body(
            BOUNDARY,
            &[("image", Some("grieta.jpg"), "image/jpeg", &b"jpeg bytes"[..])],
        );

        let res = test::call_service(&app, upload_request(body).to_request()).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: UploadResponse = test::read_body_json(res).await;
        assert_eq!(body.url, "https://media.example/accidentes/grieta.jpg");
        assert_eq!(body.public_id, "accidentes/grieta.jpg");
    }

    #[actix_web::test]
    async fn missing_file_is_a_bad_request() {
        let ctx = context(false, false);
        let app =
            test::init_service(App::new().configure(|cfg| configure(cfg, ctx.state.clone()))).await;
        let body = multipart_body(BOUNDARY, &[("note", None, "text/plain", &b"no file"[..])]);

        let res = test::call_service(&app, upload_request(body).to_request()).await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "No image file provided");
    }

    #[actix_web::test]
    async fn upstream_failure_is_a_server_error() {
        let ctx = context(false, true);
        let app =
            test::init_service(App::new().configure(|cfg| configure(cfg, ctx.state.clone()))).await;
        let body = multipart_body(
            BOUNDARY,
            &[("image", Some("grieta.jpg"), "image/jpeg", &b"jpeg bytes"[..])],
        );

        let res = test::call_service(&app, upload_request(body).to_request()).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert!(body["error"].as_str().unwrap().contains("stubbed failure"));
    }
}
