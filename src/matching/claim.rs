//! The claim transaction.
//!
//! Claiming is the one operation that must not double-fire: two people
//! claiming the same item must produce exactly one winner. The store does
//! the conditional flip under its write lock; this module adds the audit
//! record and shapes the outcome.

use crate::eid::Eid;
use crate::items::{FoundItem, ItemStore};

/// A successful claim: the item as it stood before the flip, plus the
/// finder's contact for the claimer.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub item: FoundItem,
    pub finder_contact: String,
}

/// Claim a found item.
///
/// Returns `None` when the item does not exist or was already claimed;
/// callers must not distinguish the two cases, so an attacker cannot probe
/// which ids exist. The audit record is best-effort: losing it is logged
/// and the claim stands.
pub fn claim(
    store: &dyn ItemStore,
    found_id: &Eid,
    claimer_contact: &str,
) -> anyhow::Result<Option<ClaimOutcome>> {
    let Some(item) = store.claim_found(found_id)? else {
        return Ok(None);
    };

    if let Err(err) = store.create_claim(found_id, claimer_contact) {
        log::warn!("claim record for {found_id} not written: {err:#}");
    }

    let finder_contact = item.contact_info.clone();
    Ok(Some(ClaimOutcome {
        item,
        finder_contact,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{BackendCsv, FoundItemCreate};

    fn store_with_item() -> (BackendCsv, FoundItem, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendCsv::load(dir.path()).unwrap();
        let item = store
            .create_found(FoundItemCreate {
                title: "Umbrella".to_string(),
                description: "Blue folding umbrella".to_string(),
                contact_info: "finder@example.com".to_string(),
                ..Default::default()
            })
            .unwrap();
        (store, item, dir)
    }

    #[test]
    fn test_claim_returns_finder_contact() {
        let (store, item, _dir) = store_with_item();

        let outcome = claim(&store, &item.id, "claimer@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.finder_contact, "finder@example.com");
        assert_eq!(outcome.item.id, item.id);
    }

    #[test]
    fn test_claim_writes_audit_record() {
        let (store, item, _dir) = store_with_item();

        claim(&store, &item.id, "claimer@example.com").unwrap();

        let records = store.list_claims(&item.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].claimer_contact, "claimer@example.com");
    }

    #[test]
    fn test_second_claim_loses() {
        let (store, item, _dir) = store_with_item();

        assert!(claim(&store, &item.id, "first@example.com").unwrap().is_some());
        assert!(claim(&store, &item.id, "second@example.com").unwrap().is_none());
    }

    #[test]
    fn test_unknown_id_indistinguishable_from_claimed() {
        let (store, _item, _dir) = store_with_item();

        let outcome = claim(&store, &Eid::new(), "claimer@example.com").unwrap();
        assert!(outcome.is_none());
    }
}
