use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    domain::{CertificateId, Collection, ProjectId, SessionState, SkillId},
    error::ApiError,
    protocol::{
        CertificateDraft, CertificateRecord, LoginRequest, LoginResponse, MediaUploadResponse,
        ProfileRecord, ProjectDraft, ProjectRecord, RankWrite, SkillDraft, SkillRecord,
    },
};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

/// Pointer travel (in logical pixels) required before an armed press becomes
/// a drag. A release inside this radius is a click, not a reorder.
pub const DRAG_ACTIVATION_DISTANCE: f32 = 6.0;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// A record that carries a persisted display rank. Implemented by every
/// payload type that lives in a rank-ordered collection.
pub trait RankedRecord: Clone + Send + Sync + 'static {
    type Id: Copy + PartialEq + Debug + Send + Sync + 'static;

    fn record_id(&self) -> Self::Id;
    fn rank(&self) -> i64;
    fn set_rank(&mut self, rank: i64);
}

impl RankedRecord for ProjectRecord {
    type Id = ProjectId;

    fn record_id(&self) -> ProjectId {
        self.id
    }

    fn rank(&self) -> i64 {
        self.rank
    }

    fn set_rank(&mut self, rank: i64) {
        self.rank = rank;
    }
}

impl RankedRecord for CertificateRecord {
    type Id = CertificateId;

    fn record_id(&self) -> CertificateId {
        self.id
    }

    fn rank(&self) -> i64 {
        self.rank
    }

    fn set_rank(&mut self, rank: i64) {
        self.rank = rank;
    }
}

impl RankedRecord for SkillRecord {
    type Id = SkillId;

    fn record_id(&self) -> SkillId {
        self.id
    }

    fn rank(&self) -> i64 {
        self.rank
    }

    fn set_rank(&mut self, rank: i64) {
        self.rank = rank;
    }
}

/// Backing store for one rank-ordered collection.
#[async_trait]
pub trait RankStore<R: RankedRecord>: Send + Sync {
    /// Full contents of the collection, ordered by persisted rank.
    async fn select_all(&self) -> Result<Vec<R>>;

    /// Persist a single record's rank. Concurrent writes to the same row
    /// resolve last-write-wins at the store.
    async fn write_rank(&self, id: R::Id, rank: i64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragState<Id> {
    Idle,
    /// Pressed but not yet past the activation distance.
    Armed { id: Id, origin: (f32, f32) },
    Dragging { id: Id },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("backing store unavailable: {0}")]
    StorageUnavailable(anyhow::Error),
}

/// Non-blocking notices emitted by a list. Subscribers render these as
/// dismissible banners; nothing about list state depends on them.
#[derive(Debug, Clone)]
pub enum ListEvent {
    PersistenceFailed {
        collection: Collection,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Reordered { writes_issued: usize },
    Noop,
}

/// In-memory model of one rank-ordered collection with drag reordering.
///
/// The sequence itself is the source of truth for display order; ranks are
/// derived from position and written back individually. Reordering applies
/// optimistically and never waits on, retries, or rolls back the writes it
/// dispatches. A write failure surfaces as a [`ListEvent::PersistenceFailed`]
/// notice, and `load` is the only recovery path.
pub struct ReorderableList<R: RankedRecord> {
    collection: Collection,
    records: Vec<R>,
    drag: DragState<R::Id>,
    store: Arc<dyn RankStore<R>>,
    events: broadcast::Sender<ListEvent>,
}

impl<R: RankedRecord> ReorderableList<R> {
    pub fn new(collection: Collection, store: Arc<dyn RankStore<R>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            collection,
            records: Vec::new(),
            drag: DragState::Idle,
            store,
            events,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn drag_state(&self) -> DragState<R::Id> {
        self.drag
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ListEvent> {
        self.events.subscribe()
    }

    /// Replaces the sequence with the store's current contents. On failure
    /// the previous (possibly stale) sequence is kept as-is.
    pub async fn load(&mut self) -> Result<(), LoadError> {
        match self.store.select_all().await {
            Ok(records) => {
                self.records = records;
                Ok(())
            }
            Err(err) => Err(LoadError::StorageUnavailable(err)),
        }
    }

    /// Records a pointer press on a row. The press arms a potential drag;
    /// it does not start one.
    pub fn press(&mut self, id: R::Id, position: (f32, f32)) {
        if !matches!(self.drag, DragState::Idle) {
            return;
        }
        if self.index_of(id).is_none() {
            return;
        }
        self.drag = DragState::Armed {
            id,
            origin: position,
        };
    }

    /// Promotes an armed press to a drag once the pointer has travelled past
    /// the activation distance.
    pub fn pointer_moved(&mut self, position: (f32, f32)) {
        let DragState::Armed { id, origin } = self.drag else {
            return;
        };
        let dx = position.0 - origin.0;
        let dy = position.1 - origin.1;
        if (dx * dx + dy * dy).sqrt() >= DRAG_ACTIVATION_DISTANCE {
            self.drag = DragState::Dragging { id };
        }
    }

    /// Ends the gesture without a drop: a click, or a cancelled drag.
    pub fn release(&mut self) {
        self.drag = DragState::Idle;
    }

    /// Drops `source` onto `target`: the source row is removed and
    /// reinserted at the target's index, everything between shifts by one.
    /// Ranks are then recomputed as `rank = index` over the whole sequence
    /// and one write is dispatched per record whose rank changed.
    ///
    /// Dropping a row onto itself, or onto a target no longer present, is a
    /// silent no-op that issues no writes.
    pub fn complete_drag(&mut self, source: R::Id, target: R::Id) -> ReorderOutcome {
        self.drag = DragState::Idle;

        if source == target {
            return ReorderOutcome::Noop;
        }
        let (Some(from), Some(to)) = (self.index_of(source), self.index_of(target)) else {
            return ReorderOutcome::Noop;
        };

        let moved = self.records.remove(from);
        self.records.insert(to, moved);

        let writes_issued = self.persist_current_order();
        ReorderOutcome::Reordered { writes_issued }
    }

    /// Appends a freshly created record. The store already assigned it the
    /// next rank, so no write is needed here.
    pub fn apply_inserted(&mut self, record: R) {
        self.records.push(record);
    }

    /// Drops a deleted record from the sequence. The rank gap this leaves in
    /// the store is repaired by the next reorder's full rank rewrite.
    pub fn apply_deleted(&mut self, id: R::Id) {
        self.records.retain(|record| record.record_id() != id);
    }

    fn index_of(&self, id: R::Id) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.record_id() == id)
    }

    /// Rewrites every in-memory rank to its index and dispatches one write
    /// per changed record. The writes are deliberately unawaited: display
    /// order is repairable via `load`, so the UI never blocks on write
    /// confirmation, and a failed write only produces a notice.
    fn persist_current_order(&mut self) -> usize {
        let mut writes_issued = 0;
        for (index, record) in self.records.iter_mut().enumerate() {
            let rank = index as i64;
            if record.rank() == rank {
                continue;
            }
            record.set_rank(rank);

            let id = record.record_id();
            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            let collection = self.collection;
            tokio::spawn(async move {
                if let Err(err) = store.write_rank(id, rank).await {
                    warn!(
                        collection = collection.as_str(),
                        ?id,
                        rank,
                        %err,
                        "rank write failed"
                    );
                    let _ = events.send(ListEvent::PersistenceFailed {
                        collection,
                        reason: err.to_string(),
                    });
                }
            });
            writes_issued += 1;
        }
        writes_issued
    }
}

/// Typed HTTP client for the portfolio server. Holds the bearer token from
/// the most recent login.
#[derive(Clone)]
pub struct PortfolioClient {
    http: Client,
    server_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl PortfolioClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/login", self.server_url))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;
        let response = expect_success(response).await?;
        let parsed: LoginResponse = response.json().await.context("malformed login response")?;
        *self.token.write().await = Some(parsed.token);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        let Some(token) = self.token.write().await.take() else {
            return Ok(());
        };
        let response = self
            .http
            .post(format!("{}/logout", self.server_url))
            .bearer_auth(token)
            .send()
            .await
            .context("logout request failed")?;
        expect_success(response).await?;
        Ok(())
    }

    pub async fn session(&self) -> Result<SessionState> {
        let request = self.http.get(format!("{}/session", self.server_url));
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .context("session request failed")?;
        let response = expect_success(response).await?;
        response.json().await.context("malformed session response")
    }

    pub async fn fetch_collection<R: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<R>> {
        let response = self
            .http
            .get(format!("{}/{}", self.server_url, collection.as_str()))
            .send()
            .await
            .with_context(|| format!("{} listing request failed", collection.as_str()))?;
        let response = expect_success(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("malformed {} listing", collection.as_str()))
    }

    pub async fn write_rank(&self, collection: Collection, id: i64, rank: i64) -> Result<()> {
        let request = self
            .http
            .put(format!(
                "{}/{}/{}/rank",
                self.server_url,
                collection.as_str(),
                id
            ))
            .json(&RankWrite { rank });
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .with_context(|| format!("rank write failed for {} {id}", collection.as_str()))?;
        expect_success(response).await?;
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.fetch_collection(Collection::Projects).await
    }

    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<ProjectRecord> {
        self.create_record(Collection::Projects, draft).await
    }

    pub async fn update_project(&self, id: ProjectId, draft: &ProjectDraft) -> Result<()> {
        self.update_record(Collection::Projects, id.0, draft).await
    }

    pub async fn list_certificates(&self) -> Result<Vec<CertificateRecord>> {
        self.fetch_collection(Collection::Certificates).await
    }

    pub async fn create_certificate(&self, draft: &CertificateDraft) -> Result<CertificateRecord> {
        self.create_record(Collection::Certificates, draft).await
    }

    pub async fn update_certificate(&self, id: CertificateId, draft: &CertificateDraft) -> Result<()> {
        self.update_record(Collection::Certificates, id.0, draft)
            .await
    }

    pub async fn list_skills(&self) -> Result<Vec<SkillRecord>> {
        self.fetch_collection(Collection::Skills).await
    }

    pub async fn create_skill(&self, draft: &SkillDraft) -> Result<SkillRecord> {
        self.create_record(Collection::Skills, draft).await
    }

    pub async fn update_skill(&self, id: SkillId, draft: &SkillDraft) -> Result<()> {
        self.update_record(Collection::Skills, id.0, draft).await
    }

    pub async fn delete_record(&self, collection: Collection, id: i64) -> Result<()> {
        let request = self
            .http
            .delete(format!("{}/{}/{}", self.server_url, collection.as_str(), id));
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .with_context(|| format!("delete failed for {} {id}", collection.as_str()))?;
        expect_success(response).await?;
        Ok(())
    }

    pub async fn get_profile(&self) -> Result<ProfileRecord> {
        let response = self
            .http
            .get(format!("{}/profile", self.server_url))
            .send()
            .await
            .context("profile request failed")?;
        let response = expect_success(response).await?;
        response.json().await.context("malformed profile response")
    }

    pub async fn save_profile(&self, profile: &ProfileRecord) -> Result<()> {
        let request = self
            .http
            .put(format!("{}/profile", self.server_url))
            .json(profile);
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .context("profile save failed")?;
        expect_success(response).await?;
        Ok(())
    }

    pub async fn upload_media(
        &self,
        filename: &str,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<MediaUploadResponse> {
        let mut query = vec![("filename", filename.to_string())];
        if let Some(mime) = mime_type {
            query.push(("mime_type", mime.to_string()));
        }
        let request = self
            .http
            .post(format!("{}/media/upload", self.server_url))
            .query(&query)
            .body(bytes);
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .context("media upload failed")?;
        let response = expect_success(response).await?;
        response.json().await.context("malformed upload response")
    }

    async fn create_record<D, R>(&self, collection: Collection, draft: &D) -> Result<R>
    where
        D: serde::Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .http
            .post(format!("{}/{}", self.server_url, collection.as_str()))
            .json(draft);
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .with_context(|| format!("create failed for {}", collection.as_str()))?;
        let response = expect_success(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("malformed {} create response", collection.as_str()))
    }

    async fn update_record<D>(&self, collection: Collection, id: i64, draft: &D) -> Result<()>
    where
        D: serde::Serialize + ?Sized,
    {
        let request = self
            .http
            .put(format!("{}/{}/{}", self.server_url, collection.as_str(), id))
            .json(draft);
        let response = self
            .with_bearer(request)
            .await
            .send()
            .await
            .with_context(|| format!("update failed for {} {id}", collection.as_str()))?;
        expect_success(response).await?;
        Ok(())
    }

    async fn with_bearer(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(anyhow!("request failed with {status}: {err}")),
        Err(_) => Err(anyhow!("request failed with {status}")),
    }
}

/// `RankStore` backed by the portfolio server's REST surface.
pub struct HttpRankStore<R> {
    client: PortfolioClient,
    collection: Collection,
    _marker: PhantomData<fn() -> R>,
}

impl<R> HttpRankStore<R> {
    pub fn new(client: PortfolioClient, collection: Collection) -> Self {
        Self {
            client,
            collection,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R> RankStore<R> for HttpRankStore<R>
where
    R: RankedRecord + DeserializeOwned,
    R::Id: Into<i64>,
{
    async fn select_all(&self) -> Result<Vec<R>> {
        self.client.fetch_collection(self.collection).await
    }

    async fn write_rank(&self, id: R::Id, rank: i64) -> Result<()> {
        self.client
            .write_rank(self.collection, id.into(), rank)
            .await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
