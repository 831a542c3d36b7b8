//! Application service: wires the store, the object store, the vector
//! indexes and the external models into the five public operations.

use crate::{
    config::Config,
    eid::{new_notification_token, Eid},
    items::{FoundItem, FoundItemCreate, ItemStore, LostItem, LostItemCreate},
    matching::{
        claim::{self, ClaimOutcome},
        combine,
        reverse::{self, MatchAlert},
        fallback_matches, filter_and_rank, model_id_for, validate_query, CombineError,
        EmbeddingError, GeoCandidate, GeoQuery, QueryTooVague, Retriever, TextEmbedder,
        VectorIndex, VectorStorage,
    },
    storage::StorageManager,
    vision::{ImageAnalysis, VisionError, VisionModel},
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

const FOUND_VECTORS_FILE: &str = "found_vectors.bin";
const LOST_VECTORS_FILE: &str = "lost_vectors.bin";

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    QueryTooVague(#[from] QueryTooVague),

    #[error(transparent)]
    Combine(#[from] CombineError),

    #[error("item not found or already claimed")]
    NotFoundOrAlreadyClaimed,

    #[error("embedding service: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vision service: {0}")]
    Vision(#[from] VisionError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

/// Raw ingestion input for a found item. Images are mandatory; the title,
/// description and tags come from the vision model, never the finder.
pub struct FoundIngest {
    pub images: Vec<Vec<u8>>,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
}

/// A lost-item report. Images are optional.
pub struct LostReport {
    pub description: String,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
    pub images: Vec<Vec<u8>>,
    pub alert_enabled: bool,
}

pub struct SearchRequest {
    pub query: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_miles: Option<f64>,
}

/// Found item as exposed to searchers. The finder's contact is withheld
/// until a claim succeeds.
#[derive(Debug, Clone, Serialize)]
pub struct FoundItemPublic {
    pub id: Eid,
    pub image_ids: Vec<String>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<&FoundItem> for FoundItemPublic {
    fn from(item: &FoundItem) -> Self {
        Self {
            id: item.id.clone(),
            image_ids: item.image_ids.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            tags: item.tags.clone(),
            location: item.location.clone(),
            lat: item.lat,
            lng: item.lng,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub item: FoundItemPublic,
    pub similarity: f32,
    pub distance_miles: Option<f64>,
}

/// One notification joined with its found item. The found item carries the
/// finder's contact: the bearer of the token is the lost reporter.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub id: Eid,
    pub viewed: bool,
    pub created_at: DateTime<Utc>,
    pub found_item: Option<FoundItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationView>,
    pub lost_item: Option<LostItem>,
}

pub struct App {
    pub store: Arc<dyn ItemStore>,
    storage_mgr: Arc<dyn StorageManager>,
    embedder: Arc<dyn TextEmbedder>,
    vision: Arc<dyn VisionModel>,
    config: Config,
    model_id: [u8; 32],
    found_index: RwLock<VectorIndex>,
    lost_index: RwLock<VectorIndex>,
    found_vectors: VectorStorage,
    lost_vectors: VectorStorage,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<dyn ItemStore>,
        storage_mgr: Arc<dyn StorageManager>,
        embedder: Arc<dyn TextEmbedder>,
        vision: Arc<dyn VisionModel>,
    ) -> anyhow::Result<Self> {
        let model_id = model_id_for(embedder.model_name());
        let dimensions = embedder.dimensions();

        let base = Path::new(config.base_path());
        let found_vectors = VectorStorage::new(base.join(FOUND_VECTORS_FILE));
        let lost_vectors = VectorStorage::new(base.join(LOST_VECTORS_FILE));

        let found_index = load_or_empty(&found_vectors, &model_id, dimensions)?;
        let lost_index = load_or_empty(&lost_vectors, &model_id, dimensions)?;
        log::info!(
            "vector indexes loaded: {} found, {} lost",
            found_index.len(),
            lost_index.len()
        );

        Ok(Self {
            store,
            storage_mgr,
            embedder,
            vision,
            config,
            model_id,
            found_index: RwLock::new(found_index),
            lost_index: RwLock::new(lost_index),
            found_vectors,
            lost_vectors,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest a found item: store images, describe, embed, insert, then
    /// reverse-match against standing alerts.
    ///
    /// The reverse match is a secondary effect. Its failure is logged and
    /// the ingestion still succeeds with no alert.
    pub fn ingest_found(
        &self,
        ingest: FoundIngest,
    ) -> Result<(FoundItem, Option<MatchAlert>), AppError> {
        if ingest.images.is_empty() {
            return Err(AppError::Validation("no images provided".into()));
        }
        require(&ingest.location, "location is required")?;
        require(&ingest.contact_info, "contact information is required")?;

        let image_ids = self.store_images(&ingest.images)?;
        let analysis = self.vision.describe(&ingest.images)?;

        let visual = self.embedder.embed(&visual_embedding_text(&analysis))?;
        let text = self.embedder.embed(&text_embedding_text(&analysis))?;
        let matching = &self.config.matching;
        let combined = combine(
            &visual,
            &text,
            matching.visual_weight,
            matching.text_weight,
        )?;

        let item = self.store.create_found(FoundItemCreate {
            image_ids,
            title: analysis.title,
            description: analysis.description,
            tags: analysis.tags,
            location: ingest.location,
            lat: ingest.lat,
            lng: ingest.lng,
            contact_info: ingest.contact_info,
        })?;

        {
            let mut index = index_write(&self.found_index)?;
            index
                .insert(item.id.clone(), combined.clone())
                .map_err(anyhow::Error::from)?;
        }
        self.persist_found_index();

        let alert = {
            let lost_index = index_read(&self.lost_index)?;
            let retriever = Retriever::new(
                matching.alert_thresholds.clone(),
                matching.candidate_limit,
            );
            match reverse::match_against_alerts(
                self.store.as_ref(),
                &lost_index,
                &retriever,
                &combined,
                &text,
                &item,
            ) {
                Ok(alert) => alert,
                Err(err) => {
                    log::error!("reverse match for {} failed: {err:#}", item.id);
                    None
                }
            }
        };

        Ok((item, alert))
    }

    /// File a lost-item report. The stored embedding is text-only unless
    /// images were supplied, in which case the vision description is
    /// combined in with the usual weights.
    pub fn report_lost(&self, report: LostReport) -> Result<LostItem, AppError> {
        require(&report.description, "description is required")?;
        require(&report.contact_info, "contact information is required")?;

        let image_ids = self.store_images(&report.images)?;

        // Location goes into the lost embedding, unlike search queries:
        // "wallet lost at Central Station" should embed near reports from
        // the same place.
        let text_source = match report.location.as_deref() {
            Some(location) if !location.trim().is_empty() => {
                format!("{} Lost in: {location}", report.description)
            }
            _ => report.description.clone(),
        };
        let text = self.embedder.embed(&text_source)?;

        let matching = &self.config.matching;
        let embedding = if report.images.is_empty() {
            text
        } else {
            let analysis = self.vision.describe(&report.images)?;
            let visual = self.embedder.embed(&visual_embedding_text(&analysis))?;
            combine(&visual, &text, matching.visual_weight, matching.text_weight)?
        };

        let notification_token = report.alert_enabled.then(new_notification_token);

        let item = self.store.create_lost(LostItemCreate {
            description: report.description,
            location: report.location,
            lat: report.lat,
            lng: report.lng,
            contact_info: report.contact_info,
            image_ids,
            alert_enabled: report.alert_enabled,
            notification_token,
        })?;

        {
            let mut index = index_write(&self.lost_index)?;
            index
                .insert(item.id.clone(), embedding)
                .map_err(anyhow::Error::from)?;
        }
        self.persist_lost_index();

        Ok(item)
    }

    /// Search unclaimed found items by free text, optionally bounded to a
    /// radius around a point.
    pub fn search_found(&self, request: SearchRequest) -> Result<Vec<SearchHit>, AppError> {
        validate_query(&request.query)?;

        let pool = self.store.list_unclaimed_found()?;
        if pool.is_empty() {
            return Ok(vec![]);
        }

        // The query embeds without the location text; geography is a
        // filter, not a semantic signal.
        let embedding = self.embedder.embed(request.query.trim())?;

        let matching = &self.config.matching;
        let candidate_ids: Vec<Eid> = pool.iter().map(|i| i.id.clone()).collect();
        let retriever = Retriever::new(
            matching.search_thresholds.clone(),
            matching.candidate_limit,
        );

        let hits = {
            let index = index_read(&self.found_index)?;
            match retriever.retrieve(&index, &embedding, Some(&candidate_ids)) {
                Ok(hits) if !hits.is_empty() => hits,
                Ok(_) => lexical_over_found(&request.query, &pool),
                Err(err) => {
                    log::warn!("vector search failed: {err}; trying lexical fallback");
                    lexical_over_found(&request.query, &pool)
                }
            }
        };

        let by_id: HashMap<&Eid, &FoundItem> = pool.iter().map(|i| (&i.id, i)).collect();

        let geo_query = match (request.lat, request.lng, request.radius_miles) {
            (Some(lat), Some(lng), Some(radius)) if radius > 0.0 => Some(GeoQuery {
                lat,
                lng,
                radius_miles: radius,
            }),
            _ => None,
        };

        let candidates: Vec<GeoCandidate> = hits
            .iter()
            .filter_map(|hit| {
                by_id.get(&hit.id).map(|item| GeoCandidate {
                    id: hit.id.clone(),
                    similarity: hit.similarity,
                    lat: item.lat,
                    lng: item.lng,
                })
            })
            .collect();

        let ranked = filter_and_rank(
            candidates,
            geo_query.as_ref(),
            matching.rank_epsilon,
            matching.page_size,
        );

        Ok(ranked
            .into_iter()
            .filter_map(|r| {
                by_id.get(&r.id).map(|item| SearchHit {
                    item: FoundItemPublic::from(*item),
                    similarity: r.similarity,
                    distance_miles: r.distance_miles,
                })
            })
            .collect())
    }

    /// Claim a found item, releasing the finder's contact.
    pub fn claim(&self, found_id: &Eid, claimer_contact: &str) -> Result<ClaimOutcome, AppError> {
        require(claimer_contact, "your contact information is required")?;

        claim::claim(self.store.as_ref(), found_id, claimer_contact)?
            .ok_or(AppError::NotFoundOrAlreadyClaimed)
    }

    /// All notifications for a token, newest first, joined with their found
    /// items. The token is the sole authorization; reading marks the
    /// returned notifications viewed.
    pub fn notifications(&self, token: &str) -> Result<NotificationsResponse, AppError> {
        require(token, "notification token is required")?;

        let notifications = self.store.notifications_by_token(token)?;
        let lost_item = self.store.lost_by_token(token)?;

        let mut views = Vec::with_capacity(notifications.len());
        for notification in &notifications {
            let found_item = self.store.get_found(&notification.found_item_id)?;
            views.push(NotificationView {
                id: notification.id.clone(),
                viewed: notification.viewed,
                created_at: notification.created_at,
                found_item,
            });
        }

        if !views.is_empty() {
            if let Err(err) = self.store.mark_notifications_viewed(token) {
                log::warn!("could not mark notifications viewed: {err:#}");
            }
        }

        Ok(NotificationsResponse {
            notifications: views,
            lost_item,
        })
    }

    fn store_images(&self, images: &[Vec<u8>]) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::with_capacity(images.len());
        for data in images {
            if data.is_empty() {
                continue;
            }
            let ident = format!("{}.jpg", Eid::new());
            self.storage_mgr.write(&ident, data)?;
            ids.push(ident);
        }
        Ok(ids)
    }

    // Index persistence is best-effort: the in-memory index stays
    // authoritative for this process, and the next successful save catches
    // up the file.
    fn persist_found_index(&self) {
        let index = match index_read(&self.found_index) {
            Ok(index) => index,
            Err(err) => {
                log::warn!("could not persist found vector index: {err:#}");
                return;
            }
        };
        if let Err(err) = self.found_vectors.save(&index, &self.model_id) {
            log::warn!("could not persist found vector index: {err}");
        }
    }

    fn persist_lost_index(&self) {
        let index = match index_read(&self.lost_index) {
            Ok(index) => index,
            Err(err) => {
                log::warn!("could not persist lost vector index: {err:#}");
                return;
            }
        };
        if let Err(err) = self.lost_vectors.save(&index, &self.model_id) {
            log::warn!("could not persist lost vector index: {err}");
        }
    }
}

fn index_read(lock: &RwLock<VectorIndex>) -> anyhow::Result<RwLockReadGuard<'_, VectorIndex>> {
    lock.read().map_err(|e| anyhow!("index lock poisoned: {e}"))
}

fn index_write(lock: &RwLock<VectorIndex>) -> anyhow::Result<RwLockWriteGuard<'_, VectorIndex>> {
    lock.write().map_err(|e| anyhow!("index lock poisoned: {e}"))
}

fn load_or_empty(
    storage: &VectorStorage,
    model_id: &[u8; 32],
    dimensions: usize,
) -> anyhow::Result<VectorIndex> {
    if !storage.exists() {
        return Ok(VectorIndex::new(dimensions));
    }

    storage.load(model_id, dimensions).with_context(|| {
        format!(
            "cannot load {}; a model or dimension change requires re-embedding (delete the file to start empty)",
            storage.path().display()
        )
    })
}

fn require(value: &str, message: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(message.to_string()));
    }
    Ok(())
}

/// The visual half of a found item's embedding: the vision model's
/// description phrased to emphasize physical attributes.
fn visual_embedding_text(analysis: &ImageAnalysis) -> String {
    format!(
        "Visual item: {}. Features: {}. Colors, materials, brand, size, shape, condition, unique marks.",
        analysis.description,
        analysis.tags.join(", ")
    )
}

fn text_embedding_text(analysis: &ImageAnalysis) -> String {
    format!(
        "{} {} {}",
        analysis.title,
        analysis.description,
        analysis.tags.join(" ")
    )
}

fn lexical_over_found(
    query: &str,
    pool: &[FoundItem],
) -> Vec<crate::matching::SearchResult> {
    let candidates: Vec<(Eid, String)> = pool
        .iter()
        .map(|item| (item.id.clone(), item.search_text()))
        .collect();
    fallback_matches(query, &candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisoned_index_lock_errors_instead_of_panicking() {
        let lock = Arc::new(RwLock::new(VectorIndex::new(3)));

        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(index_read(&lock).is_err());
        assert!(index_write(&lock).is_err());
    }
}
