use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{AdminId, CertificateId, Collection, MediaId, ProjectId, SkillId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredProject {
    pub id: ProjectId,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub demo_link: Option<String>,
    pub repo_link: Option<String>,
    pub image_url: Option<String>,
    pub display_rank: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub id: CertificateId,
    pub title: String,
    pub issuer: Option<String>,
    pub date_issued: Option<String>,
    pub credential_link: Option<String>,
    pub image_url: Option<String>,
    pub display_rank: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredSkill {
    pub id: SkillId,
    pub category: String,
    pub items: String,
    pub display_rank: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StoredProfile {
    pub full_name: Option<String>,
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub social_links_json: String,
    pub avatar_url: Option<String>,
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub media_id: MediaId,
    pub stored_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub bytes: Vec<u8>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_admin(&self, email: &str, password_hash: &str) -> Result<AdminId> {
        let rec = sqlx::query(
            "INSERT INTO admin_users (email, password_hash) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET password_hash=excluded.password_hash
             RETURNING id",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(AdminId(rec.get::<i64, _>(0)))
    }

    pub async fn admin_by_email(&self, email: &str) -> Result<Option<(AdminId, String)>> {
        let row = sqlx::query("SELECT id, password_hash FROM admin_users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (AdminId(r.get::<i64, _>(0)), r.get::<String, _>(1))))
    }

    pub async fn create_session(&self, admin_id: AdminId) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO admin_sessions (token, admin_id) VALUES (?, ?)")
            .bind(&token)
            .bind(admin_id.0)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    pub async fn session_admin(&self, token: &str) -> Result<Option<AdminId>> {
        let row = sqlx::query(
            "SELECT admin_id FROM admin_sessions WHERE token = ? AND revoked_at IS NULL",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AdminId(r.get::<i64, _>(0))))
    }

    pub async fn revoke_session(&self, token: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE admin_sessions SET revoked_at = CURRENT_TIMESTAMP
             WHERE token = ? AND revoked_at IS NULL",
        )
        .bind(token)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_projects(&self) -> Result<Vec<StoredProject>> {
        let rows = sqlx::query(
            "SELECT id, title, summary, content, tags, demo_link, repo_link, image_url, display_rank, created_at
             FROM projects
             ORDER BY display_rank ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(project_from_row).collect()
    }

    /// Inserts a project at the end of the display order: the new row's rank
    /// is the number of rows present before the insert.
    pub async fn insert_project(
        &self,
        title: &str,
        summary: Option<&str>,
        content: Option<&str>,
        tags: &[String],
        demo_link: Option<&str>,
        repo_link: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<StoredProject> {
        let tags_json = serde_json::to_string(tags)?;
        let row = sqlx::query(
            "INSERT INTO projects (title, summary, content, tags, demo_link, repo_link, image_url, display_rank)
             VALUES (?, ?, ?, ?, ?, ?, ?, (SELECT COUNT(*) FROM projects))
             RETURNING id, title, summary, content, tags, demo_link, repo_link, image_url, display_rank, created_at",
        )
        .bind(title)
        .bind(summary)
        .bind(content)
        .bind(tags_json)
        .bind(demo_link)
        .bind(repo_link)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await?;
        project_from_row(row)
    }

    pub async fn update_project(
        &self,
        id: ProjectId,
        title: &str,
        summary: Option<&str>,
        content: Option<&str>,
        tags: &[String],
        demo_link: Option<&str>,
        repo_link: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<bool> {
        let tags_json = serde_json::to_string(tags)?;
        let updated = sqlx::query(
            "UPDATE projects
             SET title = ?, summary = ?, content = ?, tags = ?, demo_link = ?, repo_link = ?,
                 image_url = COALESCE(?, image_url)
             WHERE id = ?",
        )
        .bind(title)
        .bind(summary)
        .bind(content)
        .bind(tags_json)
        .bind(demo_link)
        .bind(repo_link)
        .bind(image_url)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_certificates(&self) -> Result<Vec<StoredCertificate>> {
        let rows = sqlx::query(
            "SELECT id, title, issuer, date_issued, credential_link, image_url, display_rank, created_at
             FROM certificates
             ORDER BY display_rank ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(certificate_from_row).collect())
    }

    pub async fn insert_certificate(
        &self,
        title: &str,
        issuer: Option<&str>,
        date_issued: Option<&str>,
        credential_link: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<StoredCertificate> {
        let row = sqlx::query(
            "INSERT INTO certificates (title, issuer, date_issued, credential_link, image_url, display_rank)
             VALUES (?, ?, ?, ?, ?, (SELECT COUNT(*) FROM certificates))
             RETURNING id, title, issuer, date_issued, credential_link, image_url, display_rank, created_at",
        )
        .bind(title)
        .bind(issuer)
        .bind(date_issued)
        .bind(credential_link)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(certificate_from_row(row))
    }

    pub async fn update_certificate(
        &self,
        id: CertificateId,
        title: &str,
        issuer: Option<&str>,
        date_issued: Option<&str>,
        credential_link: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE certificates
             SET title = ?, issuer = ?, date_issued = ?, credential_link = ?,
                 image_url = COALESCE(?, image_url)
             WHERE id = ?",
        )
        .bind(title)
        .bind(issuer)
        .bind(date_issued)
        .bind(credential_link)
        .bind(image_url)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_skills(&self) -> Result<Vec<StoredSkill>> {
        let rows = sqlx::query(
            "SELECT id, category, items, display_rank, created_at
             FROM skills
             ORDER BY display_rank ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(skill_from_row).collect())
    }

    pub async fn insert_skill(&self, category: &str, items: &str) -> Result<StoredSkill> {
        let row = sqlx::query(
            "INSERT INTO skills (category, items, display_rank)
             VALUES (?, ?, (SELECT COUNT(*) FROM skills))
             RETURNING id, category, items, display_rank, created_at",
        )
        .bind(category)
        .bind(items)
        .fetch_one(&self.pool)
        .await?;
        Ok(skill_from_row(row))
    }

    pub async fn update_skill(&self, id: SkillId, category: &str, items: &str) -> Result<bool> {
        let updated = sqlx::query("UPDATE skills SET category = ?, items = ? WHERE id = ?")
            .bind(category)
            .bind(items)
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    /// The per-record write a reorder issues: overwrite one row's rank.
    /// Last write wins at the granularity of a single row.
    pub async fn set_rank(&self, collection: Collection, id: i64, rank: i64) -> Result<bool> {
        let sql = match collection {
            Collection::Projects => "UPDATE projects SET display_rank = ? WHERE id = ?",
            Collection::Certificates => "UPDATE certificates SET display_rank = ? WHERE id = ?",
            Collection::Skills => "UPDATE skills SET display_rank = ? WHERE id = ?",
        };
        let updated = sqlx::query(sql)
            .bind(rank)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    /// Removes a row. The vacated rank is not compacted here; density is
    /// restored by the next reorder's full rank rewrite.
    pub async fn delete_record(&self, collection: Collection, id: i64) -> Result<bool> {
        let sql = match collection {
            Collection::Projects => "DELETE FROM projects WHERE id = ?",
            Collection::Certificates => "DELETE FROM certificates WHERE id = ?",
            Collection::Skills => "DELETE FROM skills WHERE id = ?",
        };
        let deleted = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn load_profile(&self) -> Result<Option<StoredProfile>> {
        let row = sqlx::query(
            "SELECT full_name, headline, bio, social_links, avatar_url, resume_url
             FROM profile WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredProfile {
            full_name: r.get::<Option<String>, _>(0),
            headline: r.get::<Option<String>, _>(1),
            bio: r.get::<Option<String>, _>(2),
            social_links_json: r.get::<String, _>(3),
            avatar_url: r.get::<Option<String>, _>(4),
            resume_url: r.get::<Option<String>, _>(5),
        }))
    }

    pub async fn upsert_profile(&self, profile: &StoredProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO profile (id, full_name, headline, bio, social_links, avatar_url, resume_url, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                headline = excluded.headline,
                bio = excluded.bio,
                social_links = excluded.social_links,
                avatar_url = COALESCE(excluded.avatar_url, profile.avatar_url),
                resume_url = COALESCE(excluded.resume_url, profile.resume_url),
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&profile.full_name)
        .bind(&profile.headline)
        .bind(&profile.bio)
        .bind(&profile.social_links_json)
        .bind(&profile.avatar_url)
        .bind(&profile.resume_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn store_media(
        &self,
        stored_name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<MediaId> {
        let size_bytes = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        let rec = sqlx::query(
            "INSERT INTO media_files (stored_name, mime_type, size_bytes, bytes)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(stored_name)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(bytes)
        .fetch_one(&self.pool)
        .await?;
        Ok(MediaId(rec.get::<i64, _>(0)))
    }

    pub async fn load_media(&self, media_id: MediaId) -> Result<Option<StoredMedia>> {
        let row = sqlx::query(
            "SELECT id, stored_name, mime_type, size_bytes, bytes FROM media_files WHERE id = ?",
        )
        .bind(media_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredMedia {
            media_id: MediaId(r.get::<i64, _>(0)),
            stored_name: r.get::<String, _>(1),
            mime_type: r.get::<Option<String>, _>(2),
            size_bytes: r.get::<Option<i64>, _>(3).unwrap_or_default() as u64,
            bytes: r.get::<Vec<u8>, _>(4),
        }))
    }
}

fn project_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredProject> {
    let tags_json = r.get::<String, _>(4);
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("malformed tags column: {tags_json}"))?;
    Ok(StoredProject {
        id: ProjectId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        summary: r.get::<Option<String>, _>(2),
        content: r.get::<Option<String>, _>(3),
        tags,
        demo_link: r.get::<Option<String>, _>(5),
        repo_link: r.get::<Option<String>, _>(6),
        image_url: r.get::<Option<String>, _>(7),
        display_rank: r.get::<i64, _>(8),
        created_at: r.get::<DateTime<Utc>, _>(9),
    })
}

fn certificate_from_row(r: sqlx::sqlite::SqliteRow) -> StoredCertificate {
    StoredCertificate {
        id: CertificateId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        issuer: r.get::<Option<String>, _>(2),
        date_issued: r.get::<Option<String>, _>(3),
        credential_link: r.get::<Option<String>, _>(4),
        image_url: r.get::<Option<String>, _>(5),
        display_rank: r.get::<i64, _>(6),
        created_at: r.get::<DateTime<Utc>, _>(7),
    }
}

fn skill_from_row(r: sqlx::sqlite::SqliteRow) -> StoredSkill {
    StoredSkill {
        id: SkillId(r.get::<i64, _>(0)),
        category: r.get::<String, _>(1),
        items: r.get::<String, _>(2),
        display_rank: r.get::<i64, _>(3),
        created_at: r.get::<DateTime<Utc>, _>(4),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
