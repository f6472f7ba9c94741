use super::*;

async fn mem() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = mem().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("portfolio_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn inserts_assign_dense_ranks_in_arrival_order() {
    let storage = mem().await;
    let first = storage
        .insert_skill("Languages", "Rust, Python")
        .await
        .expect("skill");
    let second = storage
        .insert_skill("Tools", "Docker, Git")
        .await
        .expect("skill");
    let third = storage
        .insert_skill("Cloud", "AWS")
        .await
        .expect("skill");

    assert_eq!(first.display_rank, 0);
    assert_eq!(second.display_rank, 1);
    assert_eq!(third.display_rank, 2);

    let listed = storage.list_skills().await.expect("skills");
    let ranks: Vec<i64> = listed.iter().map(|s| s.display_rank).collect();
    assert_eq!(ranks, vec![0, 1, 2]);
}

#[tokio::test]
async fn list_orders_by_rank_not_insertion() {
    let storage = mem().await;
    let a = storage
        .insert_certificate("Cert A", Some("Issuer"), None, None, None)
        .await
        .expect("cert");
    let b = storage
        .insert_certificate("Cert B", None, None, None, None)
        .await
        .expect("cert");

    storage
        .set_rank(Collection::Certificates, a.id.0, 1)
        .await
        .expect("rank write");
    storage
        .set_rank(Collection::Certificates, b.id.0, 0)
        .await
        .expect("rank write");

    let listed = storage.list_certificates().await.expect("certs");
    assert_eq!(listed[0].id, b.id);
    assert_eq!(listed[1].id, a.id);
}

#[tokio::test]
async fn rank_write_for_missing_row_touches_nothing() {
    let storage = mem().await;
    let touched = storage
        .set_rank(Collection::Projects, 999, 0)
        .await
        .expect("rank write");
    assert!(!touched);
}

#[tokio::test]
async fn delete_leaves_a_rank_gap() {
    let storage = mem().await;
    let _a = storage.insert_skill("A", "x").await.expect("skill");
    let b = storage.insert_skill("B", "y").await.expect("skill");
    let _c = storage.insert_skill("C", "z").await.expect("skill");

    let deleted = storage
        .delete_record(Collection::Skills, b.id.0)
        .await
        .expect("delete");
    assert!(deleted);

    let ranks: Vec<i64> = storage
        .list_skills()
        .await
        .expect("skills")
        .iter()
        .map(|s| s.display_rank)
        .collect();
    assert_eq!(ranks, vec![0, 2]);
}

#[tokio::test]
async fn project_tags_round_trip_as_list() {
    let storage = mem().await;
    let tags = vec!["ai".to_string(), "rust".to_string()];
    let project = storage
        .insert_project("Demo", Some("sum"), None, &tags, None, None, None)
        .await
        .expect("project");
    assert_eq!(project.tags, tags);

    let listed = storage.list_projects().await.expect("projects");
    assert_eq!(listed[0].tags, tags);
}

#[tokio::test]
async fn project_update_keeps_image_when_none_supplied() {
    let storage = mem().await;
    let project = storage
        .insert_project("Demo", None, None, &[], None, None, Some("https://img"))
        .await
        .expect("project");

    let updated = storage
        .update_project(project.id, "Demo v2", None, None, &[], None, None, None)
        .await
        .expect("update");
    assert!(updated);

    let listed = storage.list_projects().await.expect("projects");
    assert_eq!(listed[0].title, "Demo v2");
    assert_eq!(listed[0].image_url.as_deref(), Some("https://img"));
}

#[tokio::test]
async fn profile_upsert_is_single_row() {
    let storage = mem().await;
    assert!(storage.load_profile().await.expect("load").is_none());

    storage
        .upsert_profile(&StoredProfile {
            full_name: Some("Ada".into()),
            social_links_json: "{}".into(),
            ..Default::default()
        })
        .await
        .expect("insert");
    storage
        .upsert_profile(&StoredProfile {
            full_name: Some("Ada Lovelace".into()),
            headline: Some("Engineer".into()),
            social_links_json: r#"{"github":"https://github.com/ada"}"#.into(),
            ..Default::default()
        })
        .await
        .expect("update");

    let profile = storage
        .load_profile()
        .await
        .expect("load")
        .expect("profile exists");
    assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(profile.headline.as_deref(), Some("Engineer"));
}

#[tokio::test]
async fn media_round_trips_bytes_and_metadata() {
    let storage = mem().await;
    let media_id = storage
        .store_media("1700000000-avatar.png", Some("image/png"), b"pixels")
        .await
        .expect("store");

    let media = storage
        .load_media(media_id)
        .await
        .expect("load")
        .expect("media exists");
    assert_eq!(media.stored_name, "1700000000-avatar.png");
    assert_eq!(media.mime_type.as_deref(), Some("image/png"));
    assert_eq!(media.size_bytes, 6);
    assert_eq!(media.bytes, b"pixels");
}

#[tokio::test]
async fn sessions_resolve_until_revoked() {
    let storage = mem().await;
    let admin = storage
        .create_admin("admin@example.com", "argon2-hash")
        .await
        .expect("admin");

    let token = storage.create_session(admin).await.expect("session");
    assert_eq!(
        storage.session_admin(&token).await.expect("lookup"),
        Some(admin)
    );

    assert!(storage.revoke_session(&token).await.expect("revoke"));
    assert_eq!(storage.session_admin(&token).await.expect("lookup"), None);
    assert!(!storage.revoke_session(&token).await.expect("re-revoke"));
}

#[tokio::test]
async fn admin_emails_are_unique() {
    let storage = mem().await;
    let first = storage
        .create_admin("admin@example.com", "hash-1")
        .await
        .expect("admin");
    let second = storage
        .create_admin("admin@example.com", "hash-2")
        .await
        .expect("admin again");
    assert_eq!(first, second);

    let (_, hash) = storage
        .admin_by_email("admin@example.com")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(hash, "hash-2");
}
