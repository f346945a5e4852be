use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{delete, get, http::header, post, web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;

use super::{read_upload, ApiResponse};
use crate::{
    database::StorageError,
    models::accident::{Accident, AccidentId, RiskLevel},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct AccidentQuery {
    pub riesgo: Option<String>,
}

#[derive(Debug, MultipartForm)]
pub struct AccidentMultipartRequest {
    #[multipart(rename = "accident")]
    pub accident: Text<String>,
    #[multipart(rename = "image")]
    pub image: Option<TempFile>,
}

fn storage_failure(action: &str, error: &StorageError) -> HttpResponse {
    log::error!("Failed to {action}: [{}] {error}", error.code());
    HttpResponse::InternalServerError().json(ApiResponse::failure(format!("Could not {action}")))
}

#[get("/accidents")]
pub async fn get_accidents(
    state: web::Data<AppState>,
    query: web::Query<AccidentQuery>,
) -> HttpResponse {
    let level = match query.riesgo.as_deref().map(RiskLevel::classify) {
        None => None,
        Some(Some(level)) => Some(level),
        Some(None) => {
            return HttpResponse::BadRequest().json(ApiResponse::failure("UNKNOWN_RISK_LEVEL"))
        }
    };

    match state.accidents.list().await {
        Ok(accidents) => {
            let accidents: Vec<Accident> = match level {
                Some(level) => accidents
                    .into_iter()
                    .filter(|accident| accident.risk_level() == Some(level))
                    .collect(),
                None => accidents,
            };
            HttpResponse::Ok().json(accidents)
        }
        Err(error) => storage_failure("read accidents", &error),
    }
}
#[get("/accidents/export")]
pub async fn export_accidents(state: web::Data<AppState>) -> HttpResponse {
    let accidents = match state.accidents.list().await {
        Ok(accidents) => accidents,
        Err(error) => return storage_failure("export accidents", &error),
    };

    match serde_json::to_vec_pretty(&accidents) {
        Ok(body) => {
            let file_name = format!("accidentes-{}.json", Utc::now().format("%Y-%m-%d"));
            HttpResponse::Ok()
                .content_type("application/json")
                .insert_header((
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file_name}\""),
                ))
                .body(body)
        }
        Err(error) => storage_failure("export accidents", &StorageError::Serialize(error)),
    }
}
#[post("/accidents", guard = "super::is_multipart")]
pub async fn create_accident_multipart(
    state: web::Data<AppState>,
    form: MultipartForm<AccidentMultipartRequest>,
) -> HttpResponse {
    let form = form.into_inner();

    let mut accident: Accident = match serde_json::from_str(&form.accident) {
        Ok(accident) => accident,
        Err(error) => {
            return HttpResponse::BadRequest()
                .json(ApiResponse::failure(format!("Invalid accident field: {error}")))
        }
    };
    if let Some(response) = reject_invalid(&state, &accident) {
        return response;
    }

    if let Some(image) = form.image {
        // A failed upload never blocks the record itself.
        match read_upload(image).await {
            Ok(file) => match state.uploader.upload(file, &state.media_folder).await {
                Ok(media) => accident.image_url = Some(media.url),
                Err(error) => log::warn!("Saving accident without image, upload failed: {error}"),
            },
            Err(error) => log::warn!("Saving accident without image, unreadable upload: {error}"),
        }
    }

    store(&state, accident).await
}
#[post("/accidents")]
pub async fn create_accident(
    state: web::Data<AppState>,
    payload: web::Json<Accident>,
) -> HttpResponse {
    let accident = payload.into_inner();
    if let Some(response) = reject_invalid(&state, &accident) {
        return response;
    }

    store(&state, accident).await
}
#[post("/accidents/restore")]
pub async fn restore_accidents(state: web::Data<AppState>) -> HttpResponse {
    match state.accidents.restore_defaults().await {
        Ok(accidents) => HttpResponse::Ok().json(ApiResponse::success(
            format!("Restored {} accidents", accidents.len()),
            accidents,
        )),
        Err(error) => storage_failure("restore accidents", &error),
    }
}
#[post("/accidents/import")]
pub async fn import_accidents(
    state: web::Data<AppState>,
    payload: web::Json<Vec<Accident>>,
) -> HttpResponse {
    match state.accidents.replace_all(payload.into_inner()).await {
        Ok(accidents) => HttpResponse::Ok().json(ApiResponse::success(
            format!("Imported {} accidents", accidents.len()),
            accidents,
        )),
        Err(error) => storage_failure("import accidents", &error),
    }
}
#[delete("/accidents/{accident_id}")]
pub async fn delete_accident(
    state: web::Data<AppState>,
    accident_id: web::Path<String>,
) -> HttpResponse {
    let accident_id = AccidentId::from_path(&accident_id.into_inner());

    match state.accidents.delete(&accident_id).await {
        Ok(true) => HttpResponse::Ok().json(ApiResponse::message(format!(
            "Deleted accident {accident_id}"
        ))),
        Ok(false) => HttpResponse::NotFound().json(ApiResponse::failure("ACCIDENT_NOT_FOUND")),
        Err(error @ StorageError::Unsupported { .. }) => {
            HttpResponse::NotImplemented().json(ApiResponse::failure(error.to_string()))
        }
        Err(error) => storage_failure("delete accident", &error),
    }
}

fn reject_invalid(state: &AppState, accident: &Accident) -> Option<HttpResponse> {
    if !state.require_fields {
        return None;
    }
    let problems = accident.validate();
    if problems.is_empty() {
        None
    } else {
        Some(HttpResponse::BadRequest().json(ApiResponse::failure(problems.join("; "))))
    }
}

async fn store(state: &AppState, accident: Accident) -> HttpResponse {
    match state.accidents.create(accident).await {
        Ok(accident) => {
            HttpResponse::Created().json(ApiResponse::success("Accident saved", accident))
        }
        Err(error) => storage_failure("save the accident", &error),
    }
}
