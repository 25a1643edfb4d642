use actix_web::{error::InternalError, web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tourdb::{Pagination, TourDbError};

use crate::AppState;

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .route("/status", web::get().to(status))
            .route("/{resource}", web::get().to(list_resource))
            .route("/{resource}", web::post().to(create_record))
            // Registered ahead of `/{id}` so "stats" is never read as an id
            .route("/{resource}/stats", web::get().to(resource_stats))
            .route("/{resource}/{id}", web::get().to(get_record))
            .route("/{resource}/{id}", web::put().to(update_record))
            .route("/{resource}/{id}", web::delete().to(delete_record)),
    );
}

// ── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Envelope {
    fn data(data: Value) -> Self {
        Envelope {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    fn error(error: String) -> Self {
        Envelope {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

fn ok_json(data: Value) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::data(data))
}

fn err_response(e: TourDbError) -> HttpResponse {
    match &e {
        TourDbError::NotFound { .. } => HttpResponse::NotFound().json(Envelope::error(e.to_string())),
        TourDbError::DuplicateId { .. } => {
            HttpResponse::Conflict().json(Envelope::error(e.to_string()))
        }
        _ if e.is_client_error() => {
            HttpResponse::BadRequest().json(Envelope::error(e.to_string()))
        }
        _ => {
            log::error!("Internal error: {e}");
            HttpResponse::InternalServerError()
                .json(Envelope::error("Internal server error".to_string()))
        }
    }
}

fn json_error(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(Envelope::error(format!("Invalid JSON body: {err}")));
    InternalError::from_response(err, response).into()
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, TourDbError> {
    Ok(serde_json::to_value(value)?)
}

// ── Status ──────────────────────────────────────────────────────────

async fn status(state: web::Data<AppState>) -> HttpResponse {
    ok_json(state.catalog.status(&state.store))
}

// ── Resource handlers ───────────────────────────────────────────────

async fn list_resource(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let page = match state.catalog.list(&state.store, &path, &query) {
        Ok(page) => page,
        Err(e) => return err_response(e),
    };
    match to_data(&page.items) {
        Ok(items) => HttpResponse::Ok().json(Envelope {
            pagination: Some(page.pagination),
            ..Envelope::data(items)
        }),
        Err(e) => err_response(e),
    }
}

async fn resource_stats(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    match state
        .catalog
        .stats(&state.store, &path, &query, chrono::Utc::now())
    {
        Ok(stats) => ok_json(stats),
        Err(e) => err_response(e),
    }
}

async fn get_record(state: web::Data<AppState>, path: web::Path<(String, String)>) -> HttpResponse {
    let (resource, id) = path.into_inner();
    match state.catalog.get(&state.store, &resource, &id) {
        Ok(record) => ok_json(record.into_value()),
        Err(e) => err_response(e),
    }
}

async fn create_record(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    match state.catalog.create(&state.store, &path, body.into_inner()) {
        Ok(record) => HttpResponse::Created().json(Envelope {
            message: Some(format!("Created in {path}")),
            ..Envelope::data(record.into_value())
        }),
        Err(e) => err_response(e),
    }
}

async fn update_record(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<Value>,
) -> HttpResponse {
    let (resource, id) = path.into_inner();
    match state
        .catalog
        .update(&state.store, &resource, &id, body.into_inner())
    {
        Ok(record) => ok_json(record.into_value()),
        Err(e) => err_response(e),
    }
}

async fn delete_record(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (resource, id) = path.into_inner();
    match state.catalog.remove(&state.store, &resource, &id) {
        Ok(record) => HttpResponse::Ok().json(Envelope {
            message: Some(format!("Deleted {resource}/{id}")),
            ..Envelope::data(record.into_value())
        }),
        Err(e) => err_response(e),
    }
}
