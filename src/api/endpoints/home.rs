use axum::Json;
use serde::Serialize;

use crate::config::{APP_NAME, APP_VERSION};

#[derive(Serialize)]
pub struct Welcome {
    pub message: String,
    pub version: &'static str,
}

/// `GET /`
pub async fn root() -> Json<Welcome> {
    Json(Welcome {
        message: format!("Welcome to the {APP_NAME} API"),
        version: APP_VERSION,
    })
}
