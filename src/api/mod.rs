// src/api/mod.rs
// HTTP/JSON API over the grid search engine

pub mod experiment_routes;
pub mod prompt_routes;

use crate::config::ApiConfig;
use crate::db::settings::AppSettings;
use crate::db::StoreError;
use crate::engine::GateError;
use crate::grid::ParamIteration;
use crate::state::{AppState, StateError};
use actix_cors::Cors;
use actix_web::dev::{Server, Service};
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Result as ActixResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub type SharedState = Arc<AppState>;

// ============ Response Types ============

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: error.into(),
            details: None,
        }
    }
}

/// Translate a state error into its JSON error response.
pub fn error_response(err: &StateError) -> HttpResponse {
    let status = match err {
        StateError::Validation(_)
        | StateError::Parse(_)
        | StateError::Store(StoreError::Validation(_)) => StatusCode::BAD_REQUEST,
        StateError::NoExperiment
        | StateError::Store(StoreError::NotFound(_))
        | StateError::Gate(GateError::OutOfBounds(_)) => StatusCode::NOT_FOUND,
        StateError::Store(StoreError::Conflict(_)) | StateError::Gate(_) => StatusCode::CONFLICT,
        StateError::Backend(_) => StatusCode::BAD_GATEWAY,
        StateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "Request failed");
    }

    let details = match err {
        StateError::Validation(e) => serde_json::to_value(e).ok(),
        StateError::Backend(e) => serde_json::to_value(e).ok(),
        _ => None,
    };
    HttpResponse::build(status).json(ErrorResponse {
        details,
        ..ErrorResponse::new(err.to_string())
    })
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse::new(err.to_string()));
    InternalError::from_response(err, response).into()
}

// ============ Core Endpoints ============

pub async fn health_check(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    let database = state.database_ok();
    let body = json!({
        "status": if database { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if database {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    }
}

pub async fn get_models(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.models().await {
        Ok(models) => Ok(HttpResponse::Ok().json(json!({ "models": models }))),
        Err(e) => Ok(error_response(&e)),
    }
}

pub async fn get_version(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    let version = state.version().await;
    Ok(HttpResponse::Ok().json(json!({ "version": version })))
}

/// Run a single inference outside the grid. A missing experiment UUID gets a
/// fresh one so the result is logged under its own experiment.
pub async fn run_inference(
    state: web::Data<SharedState>,
    req: web::Json<ParamIteration>,
) -> ActixResult<HttpResponse> {
    let mut params = req.into_inner();
    if params.experiment_uuid.is_empty() {
        params.experiment_uuid = uuid::Uuid::new_v4().to_string();
    }
    match state.inference(&params).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => Ok(error_response(&e)),
    }
}

pub async fn get_config(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.settings()))
}

pub async fn save_config(
    state: web::Data<SharedState>,
    req: web::Json<AppSettings>,
) -> ActixResult<HttpResponse> {
    match state.save_settings(req.into_inner()) {
        Ok(settings) => Ok(HttpResponse::Ok().json(settings)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Register every route. Shared by the server and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .route("/health", web::get().to(health_check))
        .route("/models", web::get().to(get_models))
        .route("/version", web::get().to(get_version))
        .route("/inference", web::post().to(run_inference))
        .route("/config", web::get().to(get_config))
        .route("/config", web::post().to(save_config))
        // ============ Experiments ============
        .route(
            "/experiments/run",
            web::post().to(experiment_routes::run_experiment),
        )
        .route(
            "/experiments/current",
            web::get().to(experiment_routes::get_current),
        )
        .route(
            "/experiments/current/log",
            web::get().to(experiment_routes::get_current_log),
        )
        .route(
            "/experiments/current/cancel",
            web::post().to(experiment_routes::cancel_current),
        )
        .route(
            "/experiments/current/iterations/{index}/refetch",
            web::post().to(experiment_routes::refetch_iteration),
        )
        .route(
            "/experiments/clone",
            web::post().to(experiment_routes::clone_experiment),
        )
        .route("/experiments", web::get().to(experiment_routes::list_experiments))
        .route(
            "/experiments/{uuid}",
            web::delete().to(experiment_routes::delete_experiments),
        )
        // ============ Prompts ============
        .route("/prompts", web::get().to(prompt_routes::list_prompts))
        .route("/prompts", web::post().to(prompt_routes::create_prompt))
        .route("/prompts/{uuid}", web::put().to(prompt_routes::update_prompt))
        .route(
            "/prompts/{uuid}",
            web::delete().to(prompt_routes::delete_prompt),
        );
}

pub fn start_api_server(config: &ApiConfig, state: SharedState) -> std::io::Result<Server> {
    let bind_addr = config.bind_addr();
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req.path().to_string();
                let started = Instant::now();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    crate::log_request!(
                        method.as_str(),
                        path.as_str(),
                        res.status().as_u16(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                    Ok(res)
                }
            })
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run();

    info!(bind_addr = %bind_addr, "API server listening");
    Ok(server)
}
