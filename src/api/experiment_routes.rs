// src/api/experiment_routes.rs
// Grid experiment endpoints: submit, progress, cancel, refetch, stored logs

use super::{error_response, SharedState};
use crate::state::StateError;
use crate::grid::GridForm;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    /// JSON text of a stored experiment log.
    pub contents: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub deleted: usize,
}

// ============ Current Experiment ============

/// Validate the form and start a new experiment, superseding the current one.
pub async fn run_experiment(
    state: web::Data<SharedState>,
    req: web::Json<GridForm>,
) -> ActixResult<HttpResponse> {
    match state.submit(&req) {
        Ok(snapshot) => Ok(HttpResponse::Accepted().json(snapshot)),
        Err(e) => Ok(error_response(&e)),
    }
}

pub async fn get_current(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.snapshot() {
        Some(snapshot) => Ok(HttpResponse::Ok().json(json!({
            "experiment": snapshot,
            "cache": state.cache_stats(),
        }))),
        None => Ok(error_response(&StateError::NoExperiment)),
    }
}

pub async fn get_current_log(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.current_log() {
        Ok(log) => Ok(HttpResponse::Ok().json(log)),
        Err(e) => Ok(error_response(&e)),
    }
}

pub async fn cancel_current(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.cancel() {
        Ok(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Re-run one iteration, ignoring its cached outcome.
pub async fn refetch_iteration(
    state: web::Data<SharedState>,
    path: web::Path<usize>,
) -> ActixResult<HttpResponse> {
    let index = path.into_inner();
    match state.refetch(index).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(json!({
            "index": index,
            "outcome": outcome,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

// ============ Stored Experiments ============

pub async fn list_experiments(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.list_experiments() {
        Ok(files) => Ok(HttpResponse::Ok().json(files)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Delete one stored experiment, or all of them with `*`.
pub async fn delete_experiments(
    state: web::Data<SharedState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match state.delete_experiments(&path) {
        Ok(deleted) => Ok(HttpResponse::Ok().json(DeleteResponse {
            status: "ok".to_string(),
            deleted,
        })),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Rebuild a grid form from a stored log without starting anything.
pub async fn clone_experiment(
    state: web::Data<SharedState>,
    req: web::Json<CloneRequest>,
) -> ActixResult<HttpResponse> {
    match state.clone_experiment(&req.contents) {
        Ok(form) => Ok(HttpResponse::Ok().json(form)),
        Err(e) => Ok(error_response(&e)),
    }
}
