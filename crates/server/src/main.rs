use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{CertificateId, Collection, MediaId, ProjectId, SessionState, SkillId},
    error::{ApiError, ErrorCode},
    protocol::{
        CertificateDraft, CertificateRecord, LoginRequest, LoginResponse, MediaUploadResponse,
        ProfileRecord, ProjectDraft, ProjectRecord, RankWrite, SkillDraft, SkillRecord,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
const MAX_FILENAME_BYTES: usize = 180;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct MediaUploadQuery {
    filename: String,
    mime_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    seed_admin(&storage, &settings).await?;

    let public_url = settings
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}", settings.server_bind));
    let api = ApiContext {
        storage,
        public_url,
    };
    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Creates or refreshes the single admin account from configuration. Without
/// credentials in config the account must already exist in the database.
async fn seed_admin(storage: &Storage, settings: &config::Settings) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&settings.admin_email, &settings.admin_password) else {
        return Ok(());
    };
    let hash = server_api::auth::hash_password(password)?;
    let admin_id = storage.create_admin(email, &hash).await?;
    info!(%email, admin_id = admin_id.0, "admin account seeded");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/logout", post(http_logout))
        .route("/session", get(http_session))
        .route("/projects", get(http_list_projects).post(http_create_project))
        .route(
            "/projects/:id",
            put(http_update_project).delete(http_delete_project),
        )
        .route("/projects/:id/rank", put(http_rank_project))
        .route(
            "/certificates",
            get(http_list_certificates).post(http_create_certificate),
        )
        .route(
            "/certificates/:id",
            put(http_update_certificate).delete(http_delete_certificate),
        )
        .route("/certificates/:id/rank", put(http_rank_certificate))
        .route("/skills", get(http_list_skills).post(http_create_skill))
        .route(
            "/skills/:id",
            put(http_update_skill).delete(http_delete_skill),
        )
        .route("/skills/:id/rank", put(http_rank_skill))
        .route("/profile", get(http_get_profile).put(http_save_profile))
        .route(
            "/media/upload",
            post(http_upload_media).layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES)),
        )
        .route("/media/:media_id", get(http_download_media))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(e: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(&e.code), Json(e))
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let response = server_api::login(&state.api, &req.email, &req.password)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    if let Some(token) = bearer_token(&headers) {
        server_api::logout(&state.api, token).await.map_err(reject)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn http_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionState>, (StatusCode, Json<ApiError>)> {
    let session = server_api::session_state(&state.api, bearer_token(&headers))
        .await
        .map_err(reject)?;
    Ok(Json(session))
}

async fn http_list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProjectRecord>>, (StatusCode, Json<ApiError>)> {
    let projects = server_api::list_projects(&state.api).await.map_err(reject)?;
    Ok(Json(projects))
}

async fn http_create_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<ProjectDraft>,
) -> Result<Json<ProjectRecord>, (StatusCode, Json<ApiError>)> {
    let record = server_api::create_project(&state.api, bearer_token(&headers), draft)
        .await
        .map_err(reject)?;
    Ok(Json(record))
}

async fn http_update_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(draft): Json<ProjectDraft>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::update_project(&state.api, bearer_token(&headers), ProjectId(id), draft)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::delete_record(&state.api, bearer_token(&headers), Collection::Projects, id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_rank_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(write): Json<RankWrite>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::set_record_rank(
        &state.api,
        bearer_token(&headers),
        Collection::Projects,
        id,
        write.rank,
    )
    .await
    .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_certificates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CertificateRecord>>, (StatusCode, Json<ApiError>)> {
    let certificates = server_api::list_certificates(&state.api)
        .await
        .map_err(reject)?;
    Ok(Json(certificates))
}

async fn http_create_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<CertificateDraft>,
) -> Result<Json<CertificateRecord>, (StatusCode, Json<ApiError>)> {
    let record = server_api::create_certificate(&state.api, bearer_token(&headers), draft)
        .await
        .map_err(reject)?;
    Ok(Json(record))
}

async fn http_update_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(draft): Json<CertificateDraft>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::update_certificate(
        &state.api,
        bearer_token(&headers),
        CertificateId(id),
        draft,
    )
    .await
    .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::delete_record(
        &state.api,
        bearer_token(&headers),
        Collection::Certificates,
        id,
    )
    .await
    .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_rank_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(write): Json<RankWrite>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::set_record_rank(
        &state.api,
        bearer_token(&headers),
        Collection::Certificates,
        id,
        write.rank,
    )
    .await
    .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_skills(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SkillRecord>>, (StatusCode, Json<ApiError>)> {
    let skills = server_api::list_skills(&state.api).await.map_err(reject)?;
    Ok(Json(skills))
}

async fn http_create_skill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<SkillDraft>,
) -> Result<Json<SkillRecord>, (StatusCode, Json<ApiError>)> {
    let record = server_api::create_skill(&state.api, bearer_token(&headers), draft)
        .await
        .map_err(reject)?;
    Ok(Json(record))
}

async fn http_update_skill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(draft): Json<SkillDraft>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::update_skill(&state.api, bearer_token(&headers), SkillId(id), draft)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_skill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::delete_record(&state.api, bearer_token(&headers), Collection::Skills, id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_rank_skill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(write): Json<RankWrite>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::set_record_rank(
        &state.api,
        bearer_token(&headers),
        Collection::Skills,
        id,
        write.rank,
    )
    .await
    .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_get_profile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProfileRecord>, (StatusCode, Json<ApiError>)> {
    let profile = server_api::get_profile(&state.api).await.map_err(reject)?;
    Ok(Json(profile))
}

async fn http_save_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(profile): Json<ProfileRecord>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::save_profile(&state.api, bearer_token(&headers), profile)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_upload_media(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MediaUploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MediaUploadResponse>, (StatusCode, Json<ApiError>)> {
    if q.filename.len() > MAX_FILENAME_BYTES {
        return Err(reject(ApiError::new(
            ErrorCode::Validation,
            "filename is too long",
        )));
    }
    let response = server_api::upload_media(
        &state.api,
        bearer_token(&headers),
        &q.filename,
        q.mime_type
            .as_deref()
            .filter(|mime| !mime.trim().is_empty()),
        &body,
    )
    .await
    .map_err(reject)?;
    Ok(Json(response))
}

async fn http_download_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let media = state
        .api
        .storage
        .load_media(MediaId(media_id))
        .await
        .map_err(|e| {
            warn!(%e, media_id, "media lookup failed");
            reject(ApiError::new(ErrorCode::Internal, e.to_string()))
        })?
        .ok_or_else(|| reject(ApiError::new(ErrorCode::NotFound, "media not found")))?;

    let mut headers = HeaderMap::new();
    let content_type = media
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        media.stored_name
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, media.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let hash = server_api::auth::hash_password("open sesame").expect("hash");
        storage
            .create_admin("admin@example.com", &hash)
            .await
            .expect("admin");
        let api = ApiContext {
            storage,
            public_url: "http://localhost:8099".to_string(),
        };
        build_router(Arc::new(AppState { api }))
    }

    async fn login_token(app: &Router) -> String {
        let request = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"email":"admin@example.com","password":"open sesame"}"#,
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("login response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let parsed: LoginResponse = serde_json::from_slice(&bytes).expect("json");
        parsed.token
    }

    #[tokio::test]
    async fn public_listing_needs_no_session() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/projects").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mutations_without_bearer_token_are_unauthorized() {
        let app = test_app().await;
        let request = Request::post("/skills")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"category":"Languages","items":"Rust"}"#))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rank_write_round_trips_through_the_router() {
        let app = test_app().await;
        let token = login_token(&app).await;

        for category in ["First", "Second"] {
            let request = Request::post("/skills")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(format!(
                    r#"{{"category":"{category}","items":"x"}}"#
                )))
                .expect("request");
            let response = app.clone().oneshot(request).await.expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let swap = [(1, 1), (2, 0)];
        for (id, rank) in swap {
            let request = Request::put(format!("/skills/{id}/rank"))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(format!(r#"{{"rank":{rank}}}"#)))
                .expect("request");
            let response = app.clone().oneshot(request).await.expect("response");
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .oneshot(Request::get("/skills").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let listed: Vec<SkillRecord> = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(listed[0].category, "Second");
        assert_eq!(listed[1].category, "First");
    }

    #[tokio::test]
    async fn media_upload_then_download_serves_the_bytes() {
        let app = test_app().await;
        let token = login_token(&app).await;

        let upload = Request::post("/media/upload?filename=shot.png&mime_type=image/png")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from("pixels"))
            .expect("request");
        let response = app.clone().oneshot(upload).await.expect("upload response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let uploaded: MediaUploadResponse = serde_json::from_slice(&bytes).expect("json");

        let download = Request::get(format!("/media/{}", uploaded.media_id.0))
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(download).await.expect("download response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("image/png"))
        );
        let served = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&served[..], b"pixels");
    }

    #[tokio::test]
    async fn logout_revokes_the_session() {
        let app = test_app().await;
        let token = login_token(&app).await;

        let logout = Request::post("/logout")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(logout).await.expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request = Request::post("/skills")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(r#"{"category":"Languages","items":"Rust"}"#))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
