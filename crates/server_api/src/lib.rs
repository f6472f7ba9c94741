use shared::{
    domain::{AdminId, CertificateId, Collection, ProjectId, SessionState, SkillId, SocialLinks},
    error::{ApiError, ErrorCode},
    protocol::{
        CertificateDraft, CertificateRecord, LoginResponse, MediaUploadResponse, ProfileRecord,
        ProjectDraft, ProjectRecord, SkillDraft, SkillRecord,
    },
};
use storage::{Storage, StoredCertificate, StoredProfile, StoredProject, StoredSkill};
use tracing::warn;

pub mod auth;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    /// Base URL media links are minted under, e.g. "http://localhost:8099".
    pub public_url: String,
}

pub async fn login(ctx: &ApiContext, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
    let Some((admin_id, stored_hash)) = ctx.storage.admin_by_email(email).await.map_err(internal)?
    else {
        return Err(ApiError::new(ErrorCode::Unauthorized, "invalid credentials"));
    };
    if !auth::verify_password(password, &stored_hash) {
        return Err(ApiError::new(ErrorCode::Unauthorized, "invalid credentials"));
    }
    let token = ctx.storage.create_session(admin_id).await.map_err(internal)?;
    Ok(LoginResponse { token })
}

pub async fn logout(ctx: &ApiContext, token: &str) -> Result<(), ApiError> {
    ctx.storage.revoke_session(token).await.map_err(internal)?;
    Ok(())
}

pub async fn session_state(
    ctx: &ApiContext,
    token: Option<&str>,
) -> Result<SessionState, ApiError> {
    let Some(token) = token else {
        return Ok(SessionState::Unauthenticated);
    };
    match ctx.storage.session_admin(token).await.map_err(internal)? {
        Some(admin_id) => Ok(SessionState::Authenticated { admin_id }),
        None => Ok(SessionState::Unauthenticated),
    }
}

pub async fn list_projects(ctx: &ApiContext) -> Result<Vec<ProjectRecord>, ApiError> {
    let projects = ctx.storage.list_projects().await.map_err(internal)?;
    Ok(projects.into_iter().map(project_record).collect())
}

pub async fn create_project(
    ctx: &ApiContext,
    token: Option<&str>,
    draft: ProjectDraft,
) -> Result<ProjectRecord, ApiError> {
    ensure_session(ctx, token).await?;
    let title = required_title(&draft.title)?;
    let stored = ctx
        .storage
        .insert_project(
            title,
            draft.summary.as_deref(),
            draft.content.as_deref(),
            &draft.tags,
            draft.demo_link.as_deref(),
            draft.repo_link.as_deref(),
            draft.image_url.as_deref(),
        )
        .await
        .map_err(internal)?;
    Ok(project_record(stored))
}

pub async fn update_project(
    ctx: &ApiContext,
    token: Option<&str>,
    id: ProjectId,
    draft: ProjectDraft,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    let title = required_title(&draft.title)?;
    let updated = ctx
        .storage
        .update_project(
            id,
            title,
            draft.summary.as_deref(),
            draft.content.as_deref(),
            &draft.tags,
            draft.demo_link.as_deref(),
            draft.repo_link.as_deref(),
            draft.image_url.as_deref(),
        )
        .await
        .map_err(internal)?;
    found(updated, "project not found")
}

pub async fn list_certificates(ctx: &ApiContext) -> Result<Vec<CertificateRecord>, ApiError> {
    let certificates = ctx.storage.list_certificates().await.map_err(internal)?;
    Ok(certificates.into_iter().map(certificate_record).collect())
}

pub async fn create_certificate(
    ctx: &ApiContext,
    token: Option<&str>,
    draft: CertificateDraft,
) -> Result<CertificateRecord, ApiError> {
    ensure_session(ctx, token).await?;
    let title = required_title(&draft.title)?;
    let stored = ctx
        .storage
        .insert_certificate(
            title,
            draft.issuer.as_deref(),
            draft.date_issued.as_deref(),
            draft.credential_link.as_deref(),
            draft.image_url.as_deref(),
        )
        .await
        .map_err(internal)?;
    Ok(certificate_record(stored))
}

pub async fn update_certificate(
    ctx: &ApiContext,
    token: Option<&str>,
    id: CertificateId,
    draft: CertificateDraft,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    let title = required_title(&draft.title)?;
    let updated = ctx
        .storage
        .update_certificate(
            id,
            title,
            draft.issuer.as_deref(),
            draft.date_issued.as_deref(),
            draft.credential_link.as_deref(),
            draft.image_url.as_deref(),
        )
        .await
        .map_err(internal)?;
    found(updated, "certificate not found")
}

pub async fn list_skills(ctx: &ApiContext) -> Result<Vec<SkillRecord>, ApiError> {
    let skills = ctx.storage.list_skills().await.map_err(internal)?;
    Ok(skills.into_iter().map(skill_record).collect())
}

pub async fn create_skill(
    ctx: &ApiContext,
    token: Option<&str>,
    draft: SkillDraft,
) -> Result<SkillRecord, ApiError> {
    ensure_session(ctx, token).await?;
    if draft.category.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "category is required"));
    }
    let stored = ctx
        .storage
        .insert_skill(draft.category.trim(), &draft.items)
        .await
        .map_err(internal)?;
    Ok(skill_record(stored))
}

pub async fn update_skill(
    ctx: &ApiContext,
    token: Option<&str>,
    id: SkillId,
    draft: SkillDraft,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    if draft.category.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "category is required"));
    }
    let updated = ctx
        .storage
        .update_skill(id, draft.category.trim(), &draft.items)
        .await
        .map_err(internal)?;
    found(updated, "skill not found")
}

/// One rank write of a reorder. Writes from a superseded reorder may still
/// land here after a newer one; the row simply takes the last value written.
pub async fn set_record_rank(
    ctx: &ApiContext,
    token: Option<&str>,
    collection: Collection,
    id: i64,
    rank: i64,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    if rank < 0 {
        return Err(ApiError::new(ErrorCode::Validation, "rank must be non-negative"));
    }
    let updated = ctx
        .storage
        .set_rank(collection, id, rank)
        .await
        .map_err(internal)?;
    found(updated, "record not found")
}

pub async fn delete_record(
    ctx: &ApiContext,
    token: Option<&str>,
    collection: Collection,
    id: i64,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    let deleted = ctx
        .storage
        .delete_record(collection, id)
        .await
        .map_err(internal)?;
    found(deleted, "record not found")
}

pub async fn get_profile(ctx: &ApiContext) -> Result<ProfileRecord, ApiError> {
    let stored = ctx.storage.load_profile().await.map_err(internal)?;
    Ok(stored.map(profile_record).unwrap_or_default())
}

pub async fn save_profile(
    ctx: &ApiContext,
    token: Option<&str>,
    profile: ProfileRecord,
) -> Result<(), ApiError> {
    ensure_session(ctx, token).await?;
    let social_links_json = serde_json::to_string(&profile.social_links)
        .map_err(|e| ApiError::new(ErrorCode::Validation, e.to_string()))?;
    ctx.storage
        .upsert_profile(&StoredProfile {
            full_name: profile.full_name,
            headline: profile.headline,
            bio: profile.bio,
            social_links_json,
            avatar_url: profile.avatar_url,
            resume_url: profile.resume_url,
        })
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn upload_media(
    ctx: &ApiContext,
    token: Option<&str>,
    filename: &str,
    mime_type: Option<&str>,
    bytes: &[u8],
) -> Result<MediaUploadResponse, ApiError> {
    ensure_session(ctx, token).await?;
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "filename is required"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "filename must not contain path separators",
        ));
    }
    if bytes.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "upload body cannot be empty"));
    }

    // Timestamp prefix keeps repeated uploads of the same filename distinct.
    let stored_name = format!("{}-{}", chrono::Utc::now().timestamp_millis(), filename);
    let media_id = ctx
        .storage
        .store_media(&stored_name, mime_type, bytes)
        .await
        .map_err(internal)?;
    Ok(MediaUploadResponse {
        media_id,
        url: format!("{}/media/{}", ctx.public_url.trim_end_matches('/'), media_id.0),
        size_bytes: bytes.len() as u64,
    })
}

pub async fn ensure_session(ctx: &ApiContext, token: Option<&str>) -> Result<AdminId, ApiError> {
    let Some(token) = token else {
        return Err(ApiError::new(ErrorCode::Unauthorized, "missing session token"));
    };
    match ctx.storage.session_admin(token).await.map_err(internal)? {
        Some(admin_id) => Ok(admin_id),
        None => Err(ApiError::new(
            ErrorCode::Unauthorized,
            "session expired or revoked",
        )),
    }
}

fn required_title(title: &str) -> Result<&str, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title is required"));
    }
    Ok(title)
}

fn found(hit: bool, message: &str) -> Result<(), ApiError> {
    if hit {
        Ok(())
    } else {
        Err(ApiError::new(ErrorCode::NotFound, message))
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    warn!(%err, "storage operation failed");
    ApiError::new(ErrorCode::Internal, err.to_string())
}

fn project_record(p: StoredProject) -> ProjectRecord {
    ProjectRecord {
        id: p.id,
        title: p.title,
        summary: p.summary,
        content: p.content,
        tags: p.tags,
        demo_link: p.demo_link,
        repo_link: p.repo_link,
        image_url: p.image_url,
        rank: p.display_rank,
        created_at: p.created_at,
    }
}

fn certificate_record(c: StoredCertificate) -> CertificateRecord {
    CertificateRecord {
        id: c.id,
        title: c.title,
        issuer: c.issuer,
        date_issued: c.date_issued,
        credential_link: c.credential_link,
        image_url: c.image_url,
        rank: c.display_rank,
        created_at: c.created_at,
    }
}

fn skill_record(s: StoredSkill) -> SkillRecord {
    SkillRecord {
        id: s.id,
        category: s.category,
        items: s.items,
        rank: s.display_rank,
        created_at: s.created_at,
    }
}

fn profile_record(p: StoredProfile) -> ProfileRecord {
    let social_links: SocialLinks = serde_json::from_str(&p.social_links_json).unwrap_or_default();
    ProfileRecord {
        full_name: p.full_name,
        headline: p.headline,
        bio: p.bio,
        social_links,
        avatar_url: p.avatar_url,
        resume_url: p.resume_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (ApiContext, String) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let hash = auth::hash_password("correct horse").expect("hash");
        storage
            .create_admin("admin@example.com", &hash)
            .await
            .expect("admin");
        let ctx = ApiContext {
            storage,
            public_url: "http://localhost:8099".to_string(),
        };
        let token = login(&ctx, "admin@example.com", "correct horse")
            .await
            .expect("login")
            .token;
        (ctx, token)
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let (ctx, _) = setup().await;
        let err = login(&ctx, "admin@example.com", "wrong")
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn login_rejects_unknown_email() {
        let (ctx, _) = setup().await;
        let err = login(&ctx, "nobody@example.com", "correct horse")
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn mutations_require_a_session() {
        let (ctx, _) = setup().await;
        let draft = SkillDraft {
            category: "Languages".into(),
            items: "Rust".into(),
        };
        let err = create_skill(&ctx, None, draft.clone())
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));

        let err = create_skill(&ctx, Some("bogus-token"), draft)
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn logout_invalidates_the_session() {
        let (ctx, token) = setup().await;
        logout(&ctx, &token).await.expect("logout");
        let state = session_state(&ctx, Some(&token)).await.expect("state");
        assert_eq!(state, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn created_records_receive_the_next_rank() {
        let (ctx, token) = setup().await;
        let first = create_project(
            &ctx,
            Some(&token),
            ProjectDraft {
                title: "One".into(),
                ..Default::default()
            },
        )
        .await
        .expect("project");
        let second = create_project(
            &ctx,
            Some(&token),
            ProjectDraft {
                title: "Two".into(),
                ..Default::default()
            },
        )
        .await
        .expect("project");

        assert_eq!(first.rank, 0);
        assert_eq!(second.rank, 1);
    }

    #[tokio::test]
    async fn rank_writes_reorder_the_public_listing() {
        let (ctx, token) = setup().await;
        let a = create_skill(
            &ctx,
            Some(&token),
            SkillDraft {
                category: "A".into(),
                items: "x".into(),
            },
        )
        .await
        .expect("skill");
        let b = create_skill(
            &ctx,
            Some(&token),
            SkillDraft {
                category: "B".into(),
                items: "y".into(),
            },
        )
        .await
        .expect("skill");

        set_record_rank(&ctx, Some(&token), Collection::Skills, a.id.0, 1)
            .await
            .expect("rank write");
        set_record_rank(&ctx, Some(&token), Collection::Skills, b.id.0, 0)
            .await
            .expect("rank write");

        let listed = list_skills(&ctx).await.expect("skills");
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn negative_rank_is_rejected() {
        let (ctx, token) = setup().await;
        let err = set_record_rank(&ctx, Some(&token), Collection::Skills, 1, -1)
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let (ctx, token) = setup().await;
        let err = create_project(
            &ctx,
            Some(&token),
            ProjectDraft {
                title: "   ".into(),
                ..Default::default()
            },
        )
        .await
        .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn profile_round_trips_social_links() {
        let (ctx, token) = setup().await;
        save_profile(
            &ctx,
            Some(&token),
            ProfileRecord {
                full_name: Some("Ada".into()),
                social_links: SocialLinks {
                    github: Some("https://github.com/ada".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .expect("save");

        let profile = get_profile(&ctx).await.expect("profile");
        assert_eq!(profile.full_name.as_deref(), Some("Ada"));
        assert_eq!(
            profile.social_links.github.as_deref(),
            Some("https://github.com/ada")
        );
    }

    #[tokio::test]
    async fn media_upload_mints_a_public_url() {
        let (ctx, token) = setup().await;
        let response = upload_media(&ctx, Some(&token), "shot.png", Some("image/png"), b"pixels")
            .await
            .expect("upload");
        assert_eq!(response.size_bytes, 6);
        assert_eq!(
            response.url,
            format!("http://localhost:8099/media/{}", response.media_id.0)
        );
    }

    #[tokio::test]
    async fn media_upload_rejects_path_separators() {
        let (ctx, token) = setup().await;
        let err = upload_media(&ctx, Some(&token), "../evil.png", None, b"pixels")
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }
}
