use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::media;
use crate::task::types::{
    resolution_size, GenerationJob, Task, TaskStatus, VideoSettings, DEFAULT_VIDEO_SIZE,
    MAX_PROMPT_LENGTH, QUALITY_PROMPT_SUFFIX,
};
use crate::usage::UsageDecision;
use crate::AppContext;

/// Base64 data URLs inflate the 20MB image cap by a third.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn video_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/status/:task_id", get(status))
        .route("/cancel/:task_id", post(cancel))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
}

impl ErrorBody {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
            remaining: None,
            total: None,
            current_length: None,
            max_length: None,
        }
    }

    fn usage_limit(decision: &UsageDecision) -> Self {
        Self {
            error: decision
                .reason
                .clone()
                .unwrap_or_else(|| "Daily limit reached. Try a promo code for more videos!".to_string()),
            kind: Some("USAGE_LIMIT"),
            remaining: Some(decision.remaining),
            total: Some(decision.total),
            current_length: None,
            max_length: None,
        }
    }

    fn prompt_too_long(current: usize) -> Self {
        Self {
            error: format!(
                "Prompt too long ({} characters). The limit is {} characters.",
                current, MAX_PROMPT_LENGTH
            ),
            kind: Some("PROMPT_TOO_LONG"),
            remaining: None,
            total: None,
            current_length: Some(current),
            max_length: Some(MAX_PROMPT_LENGTH),
        }
    }
}

fn reply(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    task_id: String,
    status: TaskStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: TaskStatus,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    success: bool,
}

struct ImageUpload {
    data_url: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct GenerateForm {
    image: Option<ImageUpload>,
    prompt: String,
    duration: Option<u32>,
    fps: Option<u32>,
    resolution: Option<String>,
    quality: Option<String>,
    match_original_resolution: bool,
    enable_quality_mode: bool,
    seed: Option<i64>,
    session_id: Option<String>,
    user_id: Option<String>,
}

/// The image part may arrive as a `data:` URL text field or as a raw file
/// part; either way the worker hands the provider a data URL.
async fn parse_image_field(
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<ImageUpload>, Response> {
    if field.file_name().is_some() {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| reply(StatusCode::BAD_REQUEST, ErrorBody::message(e.to_string())))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let data_url = media::to_data_url(media::guess_mime(&bytes), &bytes);
        return Ok(Some(ImageUpload {
            data_url,
            bytes: bytes.to_vec(),
        }));
    }

    let text = field
        .text()
        .await
        .map_err(|e| reply(StatusCode::BAD_REQUEST, ErrorBody::message(e.to_string())))?;
    if text.is_empty() {
        return Ok(None);
    }
    match media::decode_data_url(&text) {
        Some((_, bytes)) => Ok(Some(ImageUpload {
            data_url: text,
            bytes,
        })),
        None => Err(reply(
            StatusCode::BAD_REQUEST,
            ErrorBody::message("Invalid image encoding"),
        )),
    }
}

async fn parse_generate_form(multipart: &mut Multipart) -> Result<GenerateForm, Response> {
    let mut form = GenerateForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        reply(
            StatusCode::BAD_REQUEST,
            ErrorBody::message(format!("Failed to read multipart field: {}", e)),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            form.image = parse_image_field(field).await?;
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| reply(StatusCode::BAD_REQUEST, ErrorBody::message(e.to_string())))?;
        match name.as_str() {
            "prompt" => form.prompt = value,
            "duration" => form.duration = value.parse().ok(),
            "fps" => form.fps = value.parse().ok(),
            "resolution" => form.resolution = Some(value),
            "quality" => form.quality = Some(value),
            "matchOriginalResolution" => form.match_original_resolution = value == "true",
            "enableQualityMode" => form.enable_quality_mode = value == "true",
            "seed" => form.seed = value.parse().ok(),
            "sessionId" => form.session_id = Some(value),
            "userId" => form.user_id = Some(value),
            _ => {}
        }
    }

    Ok(form)
}

/// The fixed quality suffix is appended server-side and counted against the
/// prompt budget.
fn compose_prompt(user_prompt: &str) -> String {
    let user_prompt = user_prompt.trim();
    if user_prompt.is_empty() {
        QUALITY_PROMPT_SUFFIX.to_string()
    } else {
        format!("{} {}", user_prompt, QUALITY_PROMPT_SUFFIX)
    }
}

async fn generate(State(ctx): State<Arc<AppContext>>, mut multipart: Multipart) -> Response {
    let form = match parse_generate_form(&mut multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let Some(image) = form.image else {
        return reply(StatusCode::BAD_REQUEST, ErrorBody::message("No image provided"));
    };

    // the quota check is best-effort: an unreachable gate never blocks the user
    if let Some(session_id) = form.session_id.as_deref() {
        match ctx.usage.can_generate(session_id, form.user_id.as_deref()).await {
            Ok(decision) if !decision.can_generate => {
                info!("usage limit reached for session {}", session_id);
                return reply(
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorBody::usage_limit(&decision),
                );
            }
            Ok(_) => {
                if let Err(e) = ctx.usage.increment(session_id).await {
                    warn!("usage increment failed for session {}: {}", session_id, e);
                }
            }
            Err(e) => {
                warn!("usage gate unavailable, allowing generation: {}", e);
            }
        }
    }

    let prompt = compose_prompt(&form.prompt);
    let prompt_length = prompt.chars().count();
    if prompt_length > MAX_PROMPT_LENGTH {
        return reply(
            StatusCode::BAD_REQUEST,
            ErrorBody::prompt_too_long(prompt_length),
        );
    }

    let resolution = form.resolution.unwrap_or_else(|| "1080p".to_string());
    let video_size = if form.match_original_resolution {
        match media::sniff_dimensions(&image.bytes) {
            Some(dims) => {
                info!("matching original resolution: {}", dims);
                dims.to_string()
            }
            None => {
                warn!("could not detect image dimensions, falling back to {}", DEFAULT_VIDEO_SIZE);
                DEFAULT_VIDEO_SIZE.to_string()
            }
        }
    } else {
        resolution_size(&resolution).to_string()
    };

    let duration = form.duration.unwrap_or(5);
    let fps = form.fps.unwrap_or(30);
    let settings = VideoSettings {
        duration,
        fps,
        resolution,
        quality: form.quality.unwrap_or_else(|| "quality".to_string()),
        match_original_resolution: form.match_original_resolution,
        enable_quality_mode: form.enable_quality_mode,
        seed: form.seed,
    };

    let task_id = format!("task-{}", Uuid::new_v4());
    let task = Task::new(
        task_id.clone(),
        image.data_url.clone(),
        prompt.clone(),
        settings,
    );
    if let Err(e) = ctx.store.put(&task_id, task).await {
        error!("failed to create task: {}", e);
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::message("Failed to create task"),
        );
    }

    let job = GenerationJob {
        task_id: task_id.clone(),
        image_url: image.data_url,
        prompt,
        duration,
        fps,
        video_size,
        match_original_resolution: form.match_original_resolution,
        enable_quality_mode: form.enable_quality_mode,
        seed: form.seed,
    };
    if let Err(e) = ctx.scheduler.submit(job).await {
        error!("failed to enqueue task {}: {}", task_id, e);
        fail_task(&ctx, &task_id, "Failed to queue generation. Please try again.").await;
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::message("Failed to queue generation"),
        );
    }

    info!("task {} created", task_id);
    (
        StatusCode::OK,
        Json(GenerateResponse {
            task_id,
            status: TaskStatus::Processing,
        }),
    )
        .into_response()
}

/// Terminal fail write used when enqueueing breaks after the initial record
/// already landed. Same give-way rules as the worker's terminal writes.
async fn fail_task(ctx: &AppContext, task_id: &str, message: &str) {
    loop {
        let stored = match ctx.store.get(task_id).await {
            Ok(Some(stored)) => stored,
            _ => return,
        };
        if stored.task.status.is_terminal() {
            return;
        }
        let mut task = stored.task;
        task.status = TaskStatus::Fail;
        task.error = Some(message.to_string());
        match ctx.store.put_if_version(task_id, task, stored.version).await {
            Ok(false) => continue,
            _ => return,
        }
    }
}

async fn status(State(ctx): State<Arc<AppContext>>, Path(task_id): Path<String>) -> Response {
    if task_id.trim().is_empty() {
        return reply(StatusCode::BAD_REQUEST, ErrorBody::message("Task ID is required"));
    }

    match ctx.store.has(&task_id).await {
        Ok(false) => {
            return reply(StatusCode::NOT_FOUND, ErrorBody::message("Task not found"));
        }
        Err(e) => {
            error!("status lookup failed for task {}: {}", task_id, e);
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::message("Internal server error"),
            );
        }
        Ok(true) => {}
    }

    match ctx.store.get(&task_id).await {
        Ok(Some(stored)) => {
            let task = stored.task;
            (
                StatusCode::OK,
                Json(StatusResponse {
                    status: task.status,
                    progress: task.progress,
                    video_url: task.video_url,
                    error: task.error,
                }),
            )
                .into_response()
        }
        Ok(None) => reply(StatusCode::NOT_FOUND, ErrorBody::message("Task not found")),
        Err(e) => {
            error!("status lookup failed for task {}: {}", task_id, e);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::message("Internal server error"),
            )
        }
    }
}

async fn cancel(State(ctx): State<Arc<AppContext>>, Path(task_id): Path<String>) -> Response {
    if task_id.trim().is_empty() {
        return reply(StatusCode::BAD_REQUEST, ErrorBody::message("Task ID is required"));
    }

    loop {
        let stored = match ctx.store.get(&task_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                return reply(StatusCode::NOT_FOUND, ErrorBody::message("Task not found"));
            }
            Err(e) => {
                error!("cancel lookup failed for task {}: {}", task_id, e);
                return reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("Internal server error"),
                );
            }
        };

        // a finished task stays finished; cancelling it is a no-op
        if stored.task.status.is_terminal() {
            return (StatusCode::OK, Json(CancelResponse { success: true })).into_response();
        }

        let mut task = stored.task;
        task.status = TaskStatus::Cancelled;
        match ctx.store.put_if_version(&task_id, task, stored.version).await {
            Ok(true) => {
                info!("task {} cancelled", task_id);
                return (StatusCode::OK, Json(CancelResponse { success: true })).into_response();
            }
            Ok(false) => continue,
            Err(e) => {
                error!("cancel write failed for task {}: {}", task_id, e);
                return reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("Internal server error"),
                );
            }
        }
    }
}
