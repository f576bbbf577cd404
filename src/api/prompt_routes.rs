// src/api/prompt_routes.rs
// Prompt archive endpoints

use super::{error_response, MessageResponse, SharedState};
use crate::db::prompts::PromptInput;
use crate::state::StateError;
use actix_web::{web, HttpResponse, Result as ActixResult};

pub async fn list_prompts(state: web::Data<SharedState>) -> ActixResult<HttpResponse> {
    match state.prompts().list() {
        Ok(prompts) => Ok(HttpResponse::Ok().json(prompts)),
        Err(e) => Ok(error_response(&StateError::from(e))),
    }
}

pub async fn create_prompt(
    state: web::Data<SharedState>,
    req: web::Json<PromptInput>,
) -> ActixResult<HttpResponse> {
    match state.prompts().create(req.into_inner()) {
        Ok(prompt) => Ok(HttpResponse::Created().json(prompt)),
        Err(e) => Ok(error_response(&StateError::from(e))),
    }
}

pub async fn update_prompt(
    state: web::Data<SharedState>,
    path: web::Path<String>,
    req: web::Json<PromptInput>,
) -> ActixResult<HttpResponse> {
    match state.prompts().update(&path, req.into_inner()) {
        Ok(prompt) => Ok(HttpResponse::Ok().json(prompt)),
        Err(e) => Ok(error_response(&StateError::from(e))),
    }
}

pub async fn delete_prompt(
    state: web::Data<SharedState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match state.prompts().delete(&path) {
        Ok(()) => Ok(HttpResponse::Ok().json(MessageResponse::ok(format!(
            "Deleted prompt {}",
            path.as_str()
        )))),
        Err(e) => Ok(error_response(&StateError::from(e))),
    }
}
