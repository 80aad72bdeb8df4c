use anyhow::{Context, Result, anyhow};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{
    BubbleRenderRequest, BubbleRenderResponse, BubbleResponse, CharacterSheetRequest,
    ComposeRequest, ContinuationRequest, ContinuationResponse, DefaultBubbleRequest,
    ErrorResponse, FrameRequest, IdeasRequest, IdeasResponse, ImagePayload, MergeRequest,
    PanelImageRequest, PostRequest, ScriptRequest,
};
use super::state::ServerState;
use crate::bubble::{compute_default_bubble, layout_bubble, bubble_text};
use crate::compose::{StripLayout, StripOptions, compose, merge_vertical};
use crate::data::{PNG_MIME, decode_base64, encode_base64, sniff_image_mime};
use crate::error::{StudioError, StudioResult};
use crate::frame::{FrameStyle, apply_text_frame};
use crate::generator::ComicGenerator;
use crate::panel::{BubbleEdit, PanelController};
use crate::providers::{self, Provider};
use crate::raster::RenderContext;
use crate::script::{ContinuationType, FullScript, InstagramPost, StoryFormat};
use crate::settings::Settings;
use crate::studio::continuation_topic_or_default;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;
type SharedState<P> = State<Arc<ServerState<P>>>;

pub async fn run_server(settings: Settings, addr: String, key: Option<String>) -> Result<()> {
    let render = RenderContext::from_settings(&settings)?;
    let generator = match providers::resolve_key(key.as_deref()) {
        Ok(key) => {
            let provider =
                providers::build_provider(key, &settings.text_model, &settings.image_model);
            Some(ComicGenerator::new(provider, &settings))
        }
        Err(err) => {
            warn!("{}; generation routes are disabled", err);
            None
        }
    };
    let state = Arc::new(ServerState {
        settings,
        render,
        generator,
    });
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!(addr = %addr, "comic studio server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router<P: Provider + 'static>(state: Arc<ServerState<P>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ideas", post(ideas::<P>))
        .route("/script", post(script::<P>))
        .route("/character-sheet", post(character_sheet::<P>))
        .route("/panel-image", post(panel_image::<P>))
        .route("/post", post(instagram_post::<P>))
        .route("/continuation", post(continuation::<P>))
        .route("/bubble/default", post(default_bubble::<P>))
        .route("/bubble/render", post(render_bubble::<P>))
        .route("/frame", post(frame::<P>))
        .route("/compose", post(compose_strip::<P>))
        .route("/merge", post(merge::<P>))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

fn api_error(err: StudioError) -> ApiError {
    let status = match &err {
        StudioError::InputValidation(_) | StudioError::MissingPanel { .. } => {
            StatusCode::BAD_REQUEST
        }
        StudioError::ExternalCall(_) => StatusCode::BAD_GATEWAY,
        StudioError::Render(_) | StudioError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if !err.is_user_error() {
        warn!(status = status.as_u16(), "request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn generator<P: Provider>(state: &ServerState<P>) -> Result<&ComicGenerator<P>, ApiError> {
    state.generator.as_ref().ok_or_else(|| {
        api_error(StudioError::external(
            "no API key configured (set GEMINI_API_KEY or GOOGLE_API_KEY)",
        ))
    })
}

/// Runs pixel work off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> StudioResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| api_error(StudioError::Other(anyhow!("render task failed: {}", err))))?
        .map_err(api_error)
}

fn decode_image(field: &str, value: &str) -> StudioResult<Vec<u8>> {
    decode_base64(value)
        .map_err(|err| StudioError::validation(format!("{} is not valid base64: {:#}", field, err)))
}

fn image_payload(bytes: &[u8]) -> ImagePayload {
    ImagePayload {
        image: encode_base64(bytes),
        mime: sniff_image_mime(bytes).unwrap_or(PNG_MIME).to_string(),
    }
}

fn or_default(value: Option<String>, fallback: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

async fn ideas<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<IdeasRequest>,
) -> ApiResult<IdeasResponse> {
    let category = or_default(req.category, state.settings.default_category());
    let ideas = generator(&state)?
        .generate_ideas(&category)
        .await
        .map_err(api_error)?;
    Ok(Json(IdeasResponse { ideas }))
}

async fn script<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<ScriptRequest>,
) -> ApiResult<FullScript> {
    let format = match req.format.as_deref() {
        Some(raw) => StoryFormat::parse(raw).map_err(api_error)?,
        None => StoryFormat::Single,
    };
    let category = or_default(req.category, state.settings.default_category());
    let script = generator(&state)?
        .generate_script(&req.topic, &category, format)
        .await
        .map_err(api_error)?;
    Ok(Json(script))
}

async fn character_sheet<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<CharacterSheetRequest>,
) -> ApiResult<ImagePayload> {
    let art_style = or_default(req.art_style, state.settings.default_art_style());
    let bytes = generator(&state)?
        .generate_character_sheet(&req.description, &art_style)
        .await
        .map_err(api_error)?;
    Ok(Json(image_payload(&bytes)))
}

async fn panel_image<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<PanelImageRequest>,
) -> ApiResult<ImagePayload> {
    let art_style = or_default(req.art_style, state.settings.default_art_style());
    let bytes = generator(&state)?
        .generate_image(&req.description, &req.characters, &art_style)
        .await
        .map_err(api_error)?;
    Ok(Json(image_payload(&bytes)))
}

async fn instagram_post<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<PostRequest>,
) -> ApiResult<InstagramPost> {
    let post = generator(&state)?
        .generate_instagram_post(&req.topic, &req.script)
        .await
        .map_err(api_error)?;
    Ok(Json(post))
}

async fn continuation<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<ContinuationRequest>,
) -> ApiResult<ContinuationResponse> {
    let kind = match req.continuation_type.as_deref() {
        Some(raw) => ContinuationType::parse(raw).map_err(api_error)?,
        None => ContinuationType::Continue,
    };
    let category = or_default(req.category, state.settings.default_category());
    let topic = continuation_topic_or_default(
        &req.topic,
        req.continuation_topic.as_deref().unwrap_or_default(),
    );
    let next = generator(&state)?
        .generate_continuation_script(&req.topic, &req.script, &topic, &category, kind)
        .await
        .map_err(api_error)?;
    Ok(Json(ContinuationResponse {
        topic,
        script: next.inherit_portraits(&req.script),
    }))
}

async fn default_bubble<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<DefaultBubbleRequest>,
) -> ApiResult<BubbleResponse> {
    if req.width == 0 || req.height == 0 {
        return Err(api_error(StudioError::validation(
            "width and height must be positive",
        )));
    }
    let bubble = compute_default_bubble(req.width, req.height, &req.panel);
    let text = bubble_text(bubble.style, &req.panel);
    let layout = layout_bubble(&bubble, text.as_deref(), req.width, req.height, &state.render);
    Ok(Json(BubbleResponse { bubble, layout }))
}

async fn render_bubble<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<BubbleRenderRequest>,
) -> ApiResult<BubbleRenderResponse> {
    let response = run_blocking(move || {
        let ctx = &state.render;
        let bytes = decode_image("image", &req.image)?;
        let mut controller = PanelController::new(req.panel.panel.saturating_sub(1) as usize);
        controller.install_raw(bytes, &req.panel, ctx)?;
        if let Some(bubble) = req.bubble {
            controller.apply_edit(BubbleEdit::Replace(bubble), &req.panel, ctx)?;
        }
        let image = controller.export(&req.panel, ctx)?;
        let (Some(bubble), Some(layout)) = (controller.bubble(), controller.layout()) else {
            return Err(StudioError::render("bubble was lost while rendering"));
        };
        Ok(BubbleRenderResponse {
            image: encode_base64(&image),
            mime: PNG_MIME.to_string(),
            bubble: *bubble,
            layout: layout.clone(),
        })
    })
    .await?;
    Ok(Json(response))
}

async fn frame<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<FrameRequest>,
) -> ApiResult<ImagePayload> {
    let style = FrameStyle::parse(&req.frame_style).map_err(api_error)?;
    let bytes = run_blocking(move || {
        let raw = decode_image("image", &req.image)?;
        apply_text_frame(&raw, &req.panel, style, &state.render)
    })
    .await?;
    Ok(Json(image_payload(&bytes)))
}

async fn compose_strip<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<ComposeRequest>,
) -> ApiResult<ImagePayload> {
    let layout = match req.layout.as_deref() {
        Some(raw) => StripLayout::parse(raw).map_err(api_error)?,
        None => state.settings.layout,
    };
    let options = strip_options(&state.settings, req.gap);
    let bytes = run_blocking(move || {
        let images = req
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                image
                    .as_deref()
                    .map(|value| decode_image(&format!("images[{}]", idx), value))
                    .transpose()
            })
            .collect::<StudioResult<Vec<_>>>()?;
        compose(&images, layout, options)
    })
    .await?;
    Ok(Json(image_payload(&bytes)))
}

async fn merge<P: Provider + 'static>(
    State(state): SharedState<P>,
    Json(req): Json<MergeRequest>,
) -> ApiResult<ImagePayload> {
    let options = strip_options(&state.settings, req.gap);
    let bytes = run_blocking(move || {
        let images = req
            .images
            .iter()
            .enumerate()
            .map(|(idx, value)| decode_image(&format!("images[{}]", idx), value))
            .collect::<StudioResult<Vec<_>>>()?;
        merge_vertical(&images, options)
    })
    .await?;
    Ok(Json(image_payload(&bytes)))
}

fn strip_options(settings: &Settings, gap: Option<u32>) -> StripOptions {
    let options = settings.strip_options();
    match gap {
        Some(gap) => options.with_gap(gap),
        None => options,
    }
}
