use crate::eid::Eid;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

/// An item somebody found and handed in. Title, description and tags come
/// from the vision model; the combined embedding lives in the found vector
/// index keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundItem {
    pub id: Eid,
    pub image_ids: Vec<String>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
}

impl FoundItem {
    /// Combined searchable text, used by the lexical fallback.
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.tags.join(" "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FoundItemCreate {
    pub image_ids: Vec<String>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LostStatus {
    Active,
    Found,
}

impl LostStatus {
    fn as_str(&self) -> &'static str {
        match self {
            LostStatus::Active => "active",
            LostStatus::Found => "found",
        }
    }

    fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(LostStatus::Active),
            "found" => Ok(LostStatus::Found),
            other => Err(anyhow!("unknown lost item status {other:?}")),
        }
    }
}

/// A standing lost-item report. `notification_token` is present iff alerts
/// are enabled; `status` flips Active -> Found exactly once and never back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LostItem {
    pub id: Eid,
    pub description: String,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
    pub image_ids: Vec<String>,
    pub alert_enabled: bool,
    pub notification_token: Option<String>,
    pub status: LostStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LostItemCreate {
    pub description: String,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
    pub image_ids: Vec<String>,
    pub alert_enabled: bool,
    pub notification_token: Option<String>,
}

/// One alert linking a lost report to a found item. At most one exists per
/// (lost_item_id, found_item_id) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchNotification {
    pub id: Eid,
    pub lost_item_id: Eid,
    pub found_item_id: Eid,
    pub notification_token: String,
    pub viewed: bool,
    pub created_at: DateTime<Utc>,
}

/// Audit row written when an item is claimed. Best-effort: losing it never
/// undoes the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: Eid,
    pub found_item_id: Eid,
    pub claimer_contact: String,
    pub created_at: DateTime<Utc>,
}

pub trait ItemStore: Send + Sync {
    fn create_found(&self, create: FoundItemCreate) -> anyhow::Result<FoundItem>;
    fn get_found(&self, id: &Eid) -> anyhow::Result<Option<FoundItem>>;
    fn list_unclaimed_found(&self) -> anyhow::Result<Vec<FoundItem>>;
    /// Conditional claimed=false -> true under one write guard.
    /// Returns the pre-claim item, or `None` when missing or already claimed.
    fn claim_found(&self, id: &Eid) -> anyhow::Result<Option<FoundItem>>;

    fn create_lost(&self, create: LostItemCreate) -> anyhow::Result<LostItem>;
    fn get_lost(&self, id: &Eid) -> anyhow::Result<Option<LostItem>>;
    /// Lost items with status=active and alerts enabled: the reverse-match pool.
    fn list_active_alerts(&self) -> anyhow::Result<Vec<LostItem>>;
    /// Conditional Active -> Found. Returns false when missing or already Found.
    fn mark_lost_found(&self, id: &Eid) -> anyhow::Result<bool>;

    fn notification_exists(&self, lost: &Eid, found: &Eid) -> anyhow::Result<bool>;
    /// Check-then-insert under one write guard; `None` if the pair already exists.
    fn create_notification(
        &self,
        lost: &Eid,
        found: &Eid,
        token: &str,
    ) -> anyhow::Result<Option<MatchNotification>>;
    fn notifications_by_token(&self, token: &str) -> anyhow::Result<Vec<MatchNotification>>;
    fn mark_notifications_viewed(&self, token: &str) -> anyhow::Result<usize>;
    fn lost_by_token(&self, token: &str) -> anyhow::Result<Option<LostItem>>;

    fn create_claim(&self, found: &Eid, claimer_contact: &str) -> anyhow::Result<ClaimRecord>;
    fn list_claims(&self, found: &Eid) -> anyhow::Result<Vec<ClaimRecord>>;
}

#[derive(Debug, Default)]
struct Tables {
    found: Vec<FoundItem>,
    lost: Vec<LostItem>,
    notifications: Vec<MatchNotification>,
    claims: Vec<ClaimRecord>,
}

/// CSV-file backed store: one file per table, whole-file rewrite on
/// mutation behind temp-file + rename. Embeddings are not stored here;
/// they live in the binary vector files keyed by the same ids.
pub struct BackendCsv {
    tables: RwLock<Tables>,
    base_dir: PathBuf,
}

const FOUND_HEADERS: [&str; 11] = [
    "id",
    "image_ids",
    "title",
    "description",
    "tags",
    "location",
    "lat",
    "lng",
    "contact_info",
    "claimed",
    "created_at",
];

const LOST_HEADERS: [&str; 11] = [
    "id",
    "description",
    "location",
    "lat",
    "lng",
    "contact_info",
    "image_ids",
    "alert_enabled",
    "notification_token",
    "status",
    "created_at",
];

const NOTIFICATION_HEADERS: [&str; 6] = [
    "id",
    "lost_item_id",
    "found_item_id",
    "notification_token",
    "viewed",
    "created_at",
];

const CLAIM_HEADERS: [&str; 4] = ["id", "found_item_id", "claimer_contact", "created_at"];

fn field<'a>(record: &'a csv::StringRecord, idx: usize, name: &str) -> anyhow::Result<&'a str> {
    record.get(idx).ok_or_else(|| anyhow!("couldnt get record {name}"))
}

fn parse_opt_coord(s: &str) -> anyhow::Result<Option<f64>> {
    if s.is_empty() {
        return Ok(None);
    }
    Ok(Some(s.parse::<f64>()?))
}

fn coord_str(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_image_ids(s: &str) -> Vec<String> {
    s.split(' ').filter(|s| !s.is_empty()).map(String::from).collect()
}

fn parse_tags(s: &str) -> Vec<String> {
    s.split(',').filter(|s| !s.is_empty()).map(|s| s.trim().to_string()).collect()
}

fn parse_created_at(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("invalid created_at timestamp")?
        .with_timezone(&Utc))
}

impl BackendCsv {
    pub fn load(base_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_dir)?;

        let tables = Tables {
            found: Self::load_table(&base_dir.join("found_items.csv"), &FOUND_HEADERS, Self::parse_found)?,
            lost: Self::load_table(&base_dir.join("lost_items.csv"), &LOST_HEADERS, Self::parse_lost)?,
            notifications: Self::load_table(
                &base_dir.join("notifications.csv"),
                &NOTIFICATION_HEADERS,
                Self::parse_notification,
            )?,
            claims: Self::load_table(&base_dir.join("claims.csv"), &CLAIM_HEADERS, Self::parse_claim)?,
        };

        Ok(BackendCsv {
            tables: RwLock::new(tables),
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn load_table<T>(
        path: &Path,
        headers: &[&str],
        parse: fn(&csv::StringRecord) -> anyhow::Result<T>,
    ) -> anyhow::Result<Vec<T>> {
        if !path.exists() {
            log::info!("creating new table at {}", path.display());
            let mut csv_wrt = csv::Writer::from_path(path)?;
            csv_wrt.write_record(headers)?;
            csv_wrt.flush()?;
        }

        let mut csv_reader = csv::Reader::from_path(path)?;
        let mut rows = vec![];
        for record in csv_reader.records() {
            rows.push(parse(&record?)?);
        }
        Ok(rows)
    }

    fn parse_found(record: &csv::StringRecord) -> anyhow::Result<FoundItem> {
        Ok(FoundItem {
            id: Eid::from(field(record, 0, "id")?),
            image_ids: parse_image_ids(field(record, 1, "image_ids")?),
            title: field(record, 2, "title")?.to_string(),
            description: field(record, 3, "description")?.to_string(),
            tags: parse_tags(field(record, 4, "tags")?),
            location: field(record, 5, "location")?.to_string(),
            lat: parse_opt_coord(field(record, 6, "lat")?)?,
            lng: parse_opt_coord(field(record, 7, "lng")?)?,
            contact_info: field(record, 8, "contact_info")?.to_string(),
            claimed: field(record, 9, "claimed")? == "true",
            created_at: parse_created_at(field(record, 10, "created_at")?)?,
        })
    }

    fn parse_lost(record: &csv::StringRecord) -> anyhow::Result<LostItem> {
        let location = field(record, 2, "location")?;
        let token = field(record, 8, "notification_token")?;
        Ok(LostItem {
            id: Eid::from(field(record, 0, "id")?),
            description: field(record, 1, "description")?.to_string(),
            location: (!location.is_empty()).then(|| location.to_string()),
            lat: parse_opt_coord(field(record, 3, "lat")?)?,
            lng: parse_opt_coord(field(record, 4, "lng")?)?,
            contact_info: field(record, 5, "contact_info")?.to_string(),
            image_ids: parse_image_ids(field(record, 6, "image_ids")?),
            alert_enabled: field(record, 7, "alert_enabled")? == "true",
            notification_token: (!token.is_empty()).then(|| token.to_string()),
            status: LostStatus::parse(field(record, 9, "status")?)?,
            created_at: parse_created_at(field(record, 10, "created_at")?)?,
        })
    }

    fn parse_notification(record: &csv::StringRecord) -> anyhow::Result<MatchNotification> {
        Ok(MatchNotification {
            id: Eid::from(field(record, 0, "id")?),
            lost_item_id: Eid::from(field(record, 1, "lost_item_id")?),
            found_item_id: Eid::from(field(record, 2, "found_item_id")?),
            notification_token: field(record, 3, "notification_token")?.to_string(),
            viewed: field(record, 4, "viewed")? == "true",
            created_at: parse_created_at(field(record, 5, "created_at")?)?,
        })
    }

    fn parse_claim(record: &csv::StringRecord) -> anyhow::Result<ClaimRecord> {
        Ok(ClaimRecord {
            id: Eid::from(field(record, 0, "id")?),
            found_item_id: Eid::from(field(record, 1, "found_item_id")?),
            claimer_contact: field(record, 2, "claimer_contact")?.to_string(),
            created_at: parse_created_at(field(record, 3, "created_at")?)?,
        })
    }

    fn write_csv<F>(&self, file: &str, headers: &[&str], write_rows: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut csv::Writer<std::fs::File>) -> anyhow::Result<()>,
    {
        let path = self.base_dir.join(file);
        let temp_path = self.base_dir.join(format!("{file}-tmp"));

        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(headers)?;
        write_rows(&mut csv_wrt)?;
        csv_wrt.flush()?;

        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn save_found(&self, tables: &Tables) -> anyhow::Result<()> {
        self.write_csv("found_items.csv", &FOUND_HEADERS, |w| {
            for item in tables.found.iter() {
                w.write_record([
                    item.id.as_str(),
                    &item.image_ids.join(" "),
                    &item.title,
                    &item.description,
                    &item.tags.join(","),
                    &item.location,
                    &coord_str(item.lat),
                    &coord_str(item.lng),
                    &item.contact_info,
                    if item.claimed { "true" } else { "false" },
                    &item.created_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })
    }

    fn save_lost(&self, tables: &Tables) -> anyhow::Result<()> {
        self.write_csv("lost_items.csv", &LOST_HEADERS, |w| {
            for item in tables.lost.iter() {
                w.write_record([
                    item.id.as_str(),
                    &item.description,
                    item.location.as_deref().unwrap_or(""),
                    &coord_str(item.lat),
                    &coord_str(item.lng),
                    &item.contact_info,
                    &item.image_ids.join(" "),
                    if item.alert_enabled { "true" } else { "false" },
                    item.notification_token.as_deref().unwrap_or(""),
                    item.status.as_str(),
                    &item.created_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })
    }

    fn save_notifications(&self, tables: &Tables) -> anyhow::Result<()> {
        self.write_csv("notifications.csv", &NOTIFICATION_HEADERS, |w| {
            for n in tables.notifications.iter() {
                w.write_record([
                    n.id.as_str(),
                    n.lost_item_id.as_str(),
                    n.found_item_id.as_str(),
                    &n.notification_token,
                    if n.viewed { "true" } else { "false" },
                    &n.created_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })
    }

    fn save_claims(&self, tables: &Tables) -> anyhow::Result<()> {
        self.write_csv("claims.csv", &CLAIM_HEADERS, |w| {
            for c in tables.claims.iter() {
                w.write_record([
                    c.id.as_str(),
                    c.found_item_id.as_str(),
                    &c.claimer_contact,
                    &c.created_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })
    }

    fn write_guard(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|e| anyhow!("store lock poisoned: {e}"))
    }

    fn read_guard(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|e| anyhow!("store lock poisoned: {e}"))
    }
}

impl ItemStore for BackendCsv {
    fn create_found(&self, create: FoundItemCreate) -> anyhow::Result<FoundItem> {
        let item = FoundItem {
            id: Eid::new(),
            image_ids: create.image_ids,
            title: create.title,
            description: create.description,
            tags: create.tags,
            location: create.location,
            lat: create.lat,
            lng: create.lng,
            contact_info: create.contact_info,
            claimed: false,
            created_at: Utc::now(),
        };

        let mut tables = self.write_guard()?;
        tables.found.push(item.clone());
        self.save_found(&tables)?;

        Ok(item)
    }

    fn get_found(&self, id: &Eid) -> anyhow::Result<Option<FoundItem>> {
        let tables = self.read_guard()?;
        Ok(tables.found.iter().find(|i| &i.id == id).cloned())
    }

    fn list_unclaimed_found(&self) -> anyhow::Result<Vec<FoundItem>> {
        let tables = self.read_guard()?;
        Ok(tables.found.iter().filter(|i| !i.claimed).cloned().collect())
    }

    fn claim_found(&self, id: &Eid) -> anyhow::Result<Option<FoundItem>> {
        let mut tables = self.write_guard()?;

        // check-and-set under the write guard so two racing claims cannot
        // both observe claimed=false
        let Some(item) = tables.found.iter_mut().find(|i| &i.id == id && !i.claimed) else {
            return Ok(None);
        };
        item.claimed = true;
        let snapshot = item.clone();

        self.save_found(&tables)?;
        Ok(Some(snapshot))
    }

    fn create_lost(&self, create: LostItemCreate) -> anyhow::Result<LostItem> {
        let item = LostItem {
            id: Eid::new(),
            description: create.description,
            location: create.location,
            lat: create.lat,
            lng: create.lng,
            contact_info: create.contact_info,
            image_ids: create.image_ids,
            alert_enabled: create.alert_enabled,
            notification_token: create.notification_token,
            status: LostStatus::Active,
            created_at: Utc::now(),
        };

        let mut tables = self.write_guard()?;
        tables.lost.push(item.clone());
        self.save_lost(&tables)?;

        Ok(item)
    }

    fn get_lost(&self, id: &Eid) -> anyhow::Result<Option<LostItem>> {
        let tables = self.read_guard()?;
        Ok(tables.lost.iter().find(|i| &i.id == id).cloned())
    }

    fn list_active_alerts(&self) -> anyhow::Result<Vec<LostItem>> {
        let tables = self.read_guard()?;
        Ok(tables
            .lost
            .iter()
            .filter(|i| i.status == LostStatus::Active && i.alert_enabled)
            .cloned()
            .collect())
    }

    fn mark_lost_found(&self, id: &Eid) -> anyhow::Result<bool> {
        let mut tables = self.write_guard()?;

        let Some(item) = tables
            .lost
            .iter_mut()
            .find(|i| &i.id == id && i.status == LostStatus::Active)
        else {
            return Ok(false);
        };
        item.status = LostStatus::Found;

        self.save_lost(&tables)?;
        Ok(true)
    }

    fn notification_exists(&self, lost: &Eid, found: &Eid) -> anyhow::Result<bool> {
        let tables = self.read_guard()?;
        Ok(tables
            .notifications
            .iter()
            .any(|n| &n.lost_item_id == lost && &n.found_item_id == found))
    }

    fn create_notification(
        &self,
        lost: &Eid,
        found: &Eid,
        token: &str,
    ) -> anyhow::Result<Option<MatchNotification>> {
        let mut tables = self.write_guard()?;

        // pair uniqueness is re-checked inside the write guard; the caller's
        // dedup check alone could race with a concurrent ingestion
        if tables
            .notifications
            .iter()
            .any(|n| &n.lost_item_id == lost && &n.found_item_id == found)
        {
            return Ok(None);
        }

        let notification = MatchNotification {
            id: Eid::new(),
            lost_item_id: lost.clone(),
            found_item_id: found.clone(),
            notification_token: token.to_string(),
            viewed: false,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());

        self.save_notifications(&tables)?;
        Ok(Some(notification))
    }

    fn notifications_by_token(&self, token: &str) -> anyhow::Result<Vec<MatchNotification>> {
        let tables = self.read_guard()?;
        let mut out: Vec<_> = tables
            .notifications
            .iter()
            .filter(|n| n.notification_token == token)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn mark_notifications_viewed(&self, token: &str) -> anyhow::Result<usize> {
        let mut tables = self.write_guard()?;

        let mut flipped = 0;
        for n in tables.notifications.iter_mut() {
            if n.notification_token == token && !n.viewed {
                n.viewed = true;
                flipped += 1;
            }
        }

        if flipped > 0 {
            self.save_notifications(&tables)?;
        }
        Ok(flipped)
    }

    fn lost_by_token(&self, token: &str) -> anyhow::Result<Option<LostItem>> {
        let tables = self.read_guard()?;
        Ok(tables
            .lost
            .iter()
            .find(|i| i.notification_token.as_deref() == Some(token))
            .cloned())
    }

    fn create_claim(&self, found: &Eid, claimer_contact: &str) -> anyhow::Result<ClaimRecord> {
        let claim = ClaimRecord {
            id: Eid::new(),
            found_item_id: found.clone(),
            claimer_contact: claimer_contact.to_string(),
            created_at: Utc::now(),
        };

        let mut tables = self.write_guard()?;
        tables.claims.push(claim.clone());
        self.save_claims(&tables)?;

        Ok(claim)
    }

    fn list_claims(&self, found: &Eid) -> anyhow::Result<Vec<ClaimRecord>> {
        let tables = self.read_guard()?;
        Ok(tables
            .claims
            .iter()
            .filter(|c| &c.found_item_id == found)
            .cloned()
            .collect())
    }
}
