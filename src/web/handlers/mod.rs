use axum::Router;
use std::sync::Arc;

use crate::AppContext;

pub mod video;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new().nest("/api/video", video::video_router(ctx))
}
