//! Reverse matching: a newly ingested found item against standing alerts.
//!
//! Runs after a found item is stored. Lost reporters opted into alerts get
//! a notification the moment something plausibly theirs turns up; the
//! finder gets the best match's contact back synchronously.
//!
//! Retrieval is two-pass: the combined (visual+text) embedding first, then
//! the text-only embedding, which covers lost reports filed without
//! photos. If vector search errors or both passes come up empty, the
//! lexical fallback runs over the same candidate pool. Per-candidate
//! notification failures are logged and skipped, never aborting the
//! remaining candidates or the ingestion itself.

use std::collections::HashMap;

use crate::eid::Eid;
use crate::items::{FoundItem, ItemStore, LostItem};

use super::index::{SearchResult, VectorIndex};
use super::lexical::fallback_matches;
use super::retriever::Retriever;

/// The match surfaced to the finder at ingestion time.
#[derive(Debug, Clone)]
pub struct MatchAlert {
    pub lost_item_id: Eid,
    pub similarity: f32,
    /// Lost reporter's contact, handed to the finder.
    pub contact_info: String,
}

/// Match `found` against every active, alert-enabled lost report.
///
/// Creates at most one notification per (lost, found) pair and transitions
/// each notified lost item Active -> Found. Returns the best candidate's
/// contact regardless of whether its notification succeeded.
pub fn match_against_alerts(
    store: &dyn ItemStore,
    lost_index: &VectorIndex,
    retriever: &Retriever,
    combined_embedding: &[f32],
    text_embedding: &[f32],
    found: &FoundItem,
) -> anyhow::Result<Option<MatchAlert>> {
    let pool = store.list_active_alerts()?;
    if pool.is_empty() {
        return Ok(None);
    }

    let candidate_ids: Vec<Eid> = pool.iter().map(|l| l.id.clone()).collect();
    let matches = retrieve_candidates(
        lost_index,
        retriever,
        combined_embedding,
        text_embedding,
        &candidate_ids,
        &pool,
        found,
    );
    if matches.is_empty() {
        return Ok(None);
    }

    let by_id: HashMap<&Eid, &LostItem> = pool.iter().map(|l| (&l.id, l)).collect();

    for hit in &matches {
        let Some(lost) = by_id.get(&hit.id) else {
            continue;
        };
        if let Err(err) = notify(store, lost, &found.id) {
            log::warn!(
                "notification for lost item {} failed: {err:#}; continuing",
                lost.id
            );
        }
    }

    let best = &matches[0];
    let alert = by_id.get(&best.id).map(|lost| MatchAlert {
        lost_item_id: lost.id.clone(),
        similarity: best.similarity,
        contact_info: lost.contact_info.clone(),
    });

    Ok(alert)
}

fn retrieve_candidates(
    lost_index: &VectorIndex,
    retriever: &Retriever,
    combined_embedding: &[f32],
    text_embedding: &[f32],
    candidate_ids: &[Eid],
    pool: &[LostItem],
    found: &FoundItem,
) -> Vec<SearchResult> {
    let vector_passes = || -> Result<Vec<SearchResult>, super::index::IndexError> {
        let hits = retriever.retrieve(lost_index, combined_embedding, Some(candidate_ids))?;
        if !hits.is_empty() {
            return Ok(hits);
        }
        // Imageless lost reports embed closer to pure text
        retriever.retrieve(lost_index, text_embedding, Some(candidate_ids))
    };

    match vector_passes() {
        Ok(hits) if !hits.is_empty() => hits,
        Ok(_) => lexical_pass(pool, found),
        Err(err) => {
            log::warn!("vector reverse match failed: {err}; trying lexical fallback");
            lexical_pass(pool, found)
        }
    }
}

fn lexical_pass(pool: &[LostItem], found: &FoundItem) -> Vec<SearchResult> {
    let candidates: Vec<(Eid, String)> = pool
        .iter()
        .map(|lost| {
            let mut text = lost.description.clone();
            if let Some(location) = &lost.location {
                text.push(' ');
                text.push_str(location);
            }
            (lost.id.clone(), text)
        })
        .collect();

    fallback_matches(&found.search_text(), &candidates)
}

/// One candidate's notification: dedup, insert, transition.
fn notify(store: &dyn ItemStore, lost: &LostItem, found_id: &Eid) -> anyhow::Result<()> {
    let Some(token) = &lost.notification_token else {
        return Ok(());
    };

    match store.create_notification(&lost.id, found_id, token)? {
        Some(notification) => {
            log::info!(
                "notification {} created for lost item {}",
                notification.id,
                lost.id
            );
        }
        None => {
            // Pair already notified: this found item was re-matched. Still
            // transition below, so a report whose earlier flip failed does
            // not stay Active and re-alert forever.
            log::debug!(
                "notification for ({}, {found_id}) already exists, skipping",
                lost.id
            );
        }
    }

    store.mark_lost_found(&lost.id)?;
    Ok(())
}
