//! Palette document store with optimistic concurrency
//!
//! Every stored palette carries a [`VersionToken`]. Writes that name an
//! expected token succeed only if it still matches the stored one; the check
//! and the write are one SQL statement. Writes without a token are
//! last-writer-wins: on a lost race the mutation is re-applied to the fresh
//! document.
//!
//! Snapshots are immutable copies kept in `palette_snapshots`; restoring one
//! overwrites the live document (same id) and advances its version.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use trk_common::events::{EventBus, TrkEvent};
use trk_common::time::{parse_rfc3339, to_rfc3339_micros};
use trk_common::{Error, Result};

use crate::db::{self, retry::DEFAULT_MAX_LOCK_WAIT, retry_on_lock};
use crate::models::{
    CanvasDoc, Node, NodeCreate, NodePatch, PaletteCreate, PalettePatch, VersionToken,
};
use crate::pagination::Page;

/// Bound on re-applying an unconditional write after lost races
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Bound on picking a free snapshot timestamp
const MAX_SNAPSHOT_ATTEMPTS: usize = 16;

/// A value read from or written to the store, with the document's version
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: VersionToken,
}

/// `{ts, locator}` naming one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub ts: String,
    /// `<palette_id>/<ts>`
    pub locator: String,
}

impl SnapshotInfo {
    fn new(palette_id: &str, ts: String) -> Self {
        Self {
            locator: format!("{}/{}", palette_id, ts),
            ts,
        }
    }
}

/// How a restore names its snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRef {
    Ts(String),
    Locator(String),
}

/// List entry for `GET /api/palettes`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteSummary {
    pub id: String,
    pub name: String,
    pub experiment_id: Option<String>,
    pub node_count: usize,
    pub version: VersionToken,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct PaletteStore {
    pool: SqlitePool,
    event_bus: EventBus,
}

impl PaletteStore {
    pub fn new(pool: SqlitePool, event_bus: EventBus) -> Self {
        Self { pool, event_bus }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, request: PaletteCreate) -> Result<Versioned<CanvasDoc>> {
        let id = trk_common::uuid_utils::short_id();
        let doc = CanvasDoc::new(id.clone(), request.name, request.experiment_id);
        doc.validate()?;

        let json = serde_json::to_string(&doc)?;
        let now = to_rfc3339_micros(Utc::now());
        let version = VersionToken::INITIAL;
        retry_on_lock("palette_create", DEFAULT_MAX_LOCK_WAIT, || {
            db::palettes::insert(&self.pool, &id, &json, version.0, &now)
        })
        .await?;

        tracing::info!(palette_id = %id, "Palette created");
        self.emit_updated(&id, version);
        Ok(Versioned {
            value: doc,
            version,
        })
    }

    pub async fn read(&self, id: &str) -> Result<Versioned<CanvasDoc>> {
        let row = db::palettes::fetch(&self.pool, id)
            .await?
            .ok_or_else(|| Error::not_found("palette", id))?;
        Ok(Versioned {
            value: parse_doc(&row.doc)?,
            version: VersionToken(row.version),
        })
    }

    /// Apply `mutate` to the stored document and write it back
    ///
    /// With `expected = Some(v)` the write happens only if the stored version
    /// is still `v`, otherwise `Conflict` and nothing changes. With `None`
    /// the write is unconditional. An error from `mutate` or from document
    /// validation aborts without writing.
    pub async fn conditional_write<F, R>(
        &self,
        id: &str,
        expected: Option<VersionToken>,
        mut mutate: F,
    ) -> Result<(Versioned<CanvasDoc>, R)>
    where
        F: FnMut(&mut CanvasDoc) -> Result<R>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.read(id).await?;
            if let Some(expected) = expected {
                if expected != current.version {
                    return Err(version_conflict(id, expected, current.version));
                }
            }

            let mut doc = current.value;
            let output = mutate(&mut doc)?;
            doc.id = id.to_string();
            doc.validate()?;

            let json = serde_json::to_string(&doc)?;
            let now = to_rfc3339_micros(Utc::now());
            let changed = retry_on_lock("palette_write", DEFAULT_MAX_LOCK_WAIT, || {
                db::palettes::update_if_version(&self.pool, id, &json, current.version.0, &now)
            })
            .await?;

            if changed == 1 {
                let version = current.version.next();
                tracing::debug!(palette_id = %id, version = %version, "Palette written");
                self.emit_updated(id, version);
                return Ok((Versioned { value: doc, version }, output));
            }

            // Lost the race to another writer, or the row is gone
            if !db::palettes::exists(&self.pool, id).await? {
                return Err(Error::not_found("palette", id));
            }
            if let Some(expected) = expected {
                let stored = self.read(id).await?.version;
                return Err(version_conflict(id, expected, stored));
            }
            tracing::debug!(palette_id = %id, attempt, "Unconditional write lost a race, retrying");
        }

        Err(Error::Conflict(format!(
            "palette {} is changing too fast, gave up after {} attempts",
            id, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Replace the whole document; the stored id is kept
    pub async fn replace(
        &self,
        id: &str,
        doc: CanvasDoc,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<CanvasDoc>> {
        let (written, ()) = self
            .conditional_write(id, expected, |stored| {
                *stored = doc.clone();
                Ok(())
            })
            .await?;
        Ok(written)
    }

    pub async fn patch(
        &self,
        id: &str,
        patch: PalettePatch,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<CanvasDoc>> {
        let (written, ()) = self
            .conditional_write(id, expected, |doc| {
                patch.clone().apply(doc);
                Ok(())
            })
            .await?;
        Ok(written)
    }

    /// Delete a palette together with its snapshots
    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = retry_on_lock("palette_delete", DEFAULT_MAX_LOCK_WAIT, || {
            db::palettes::delete(&self.pool, id)
        })
        .await?;
        if removed == 0 {
            return Err(Error::not_found("palette", id));
        }

        tracing::info!(palette_id = %id, "Palette deleted");
        self.event_bus.emit_lossy(TrkEvent::PaletteDeleted {
            palette_id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Append a node; its id must not already be used in the document
    pub async fn add_node(
        &self,
        id: &str,
        request: NodeCreate,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<Node>> {
        let node = request.into_node();
        let (written, node) = self
            .conditional_write(id, expected, |doc| {
                if doc.node(&node.id).is_some() {
                    return Err(Error::InvalidInput(format!(
                        "node {} already exists in palette {}",
                        node.id, id
                    )));
                }
                doc.nodes.push(node.clone());
                Ok(node.clone())
            })
            .await?;
        Ok(Versioned {
            value: node,
            version: written.version,
        })
    }

    /// Patch one node; an unknown node id is a node-level `NotFound`
    pub async fn patch_node(
        &self,
        id: &str,
        node_id: &str,
        patch: NodePatch,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<Node>> {
        let (written, node) = self
            .conditional_write(id, expected, |doc| {
                let node = doc
                    .node_mut(node_id)
                    .ok_or_else(|| node_not_found(id, node_id))?;
                patch.clone().apply(node);
                Ok(node.clone())
            })
            .await?;
        Ok(Versioned {
            value: node,
            version: written.version,
        })
    }

    /// Remove one node and its group memberships
    pub async fn remove_node(
        &self,
        id: &str,
        node_id: &str,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<Node>> {
        let (written, node) = self
            .conditional_write(id, expected, |doc| {
                doc.remove_node(node_id)
                    .ok_or_else(|| node_not_found(id, node_id))
            })
            .await?;
        Ok(Versioned {
            value: node,
            version: written.version,
        })
    }

    /// Persist an immutable copy of the current document
    ///
    /// Snapshot timestamps are unique per palette: if the clock has not moved
    /// past the latest snapshot, the new one is stamped one microsecond later.
    pub async fn snapshot(&self, id: &str) -> Result<SnapshotInfo> {
        let row = db::palettes::fetch(&self.pool, id)
            .await?
            .ok_or_else(|| Error::not_found("palette", id))?;
        let created_at = to_rfc3339_micros(Utc::now());

        let mut candidate = Utc::now();
        if let Some(latest) = db::snapshots::latest_ts(&self.pool, id)
            .await?
            .as_deref()
            .and_then(parse_rfc3339)
        {
            candidate = candidate.max(latest + one_micro());
        }

        for _ in 0..MAX_SNAPSHOT_ATTEMPTS {
            let ts = to_rfc3339_micros(candidate);
            let inserted = retry_on_lock("palette_snapshot", DEFAULT_MAX_LOCK_WAIT, || {
                db::snapshots::insert(&self.pool, id, &ts, &row.doc, &created_at)
            })
            .await?;
            if inserted {
                tracing::info!(palette_id = %id, ts = %ts, "Palette snapshot taken");
                return Ok(SnapshotInfo::new(id, ts));
            }
            candidate = candidate + one_micro();
        }

        Err(Error::Conflict(format!(
            "could not allocate a snapshot timestamp for palette {}",
            id
        )))
    }

    /// Snapshots of a palette, newest first
    pub async fn list_snapshots(&self, id: &str, page: Page) -> Result<Vec<SnapshotInfo>> {
        if !db::palettes::exists(&self.pool, id).await? {
            return Err(Error::not_found("palette", id));
        }
        let stamps = db::snapshots::list_ts(&self.pool, id, page.limit, page.offset).await?;
        Ok(stamps
            .into_iter()
            .map(|ts| SnapshotInfo::new(id, ts))
            .collect())
    }

    /// Overwrite the live document with a snapshot's content
    ///
    /// The live id is kept and the version advances. A locator naming a
    /// different palette is rejected as invalid input.
    pub async fn restore(
        &self,
        id: &str,
        snapshot: SnapshotRef,
        expected: Option<VersionToken>,
    ) -> Result<Versioned<CanvasDoc>> {
        let ts = match snapshot {
            SnapshotRef::Ts(ts) => normalize_ts(&ts)?,
            SnapshotRef::Locator(locator) => {
                let (palette_id, ts) = locator.split_once('/').ok_or_else(|| {
                    Error::InvalidInput(format!("malformed snapshot locator: {}", locator))
                })?;
                if palette_id != id {
                    return Err(Error::InvalidInput(format!(
                        "snapshot {} belongs to palette {}, not {}",
                        locator, palette_id, id
                    )));
                }
                normalize_ts(ts)?
            }
        };

        let row = db::snapshots::fetch(&self.pool, id, &ts)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot {} of palette {}", ts, id)))?;
        let snapshot_doc = parse_doc(&row.doc)?;

        let (written, ()) = self
            .conditional_write(id, expected, |doc| {
                *doc = snapshot_doc.clone();
                Ok(())
            })
            .await?;

        tracing::info!(palette_id = %id, ts = %ts, version = %written.version, "Palette restored");
        self.event_bus.emit_lossy(TrkEvent::PaletteRestored {
            palette_id: id.to_string(),
            snapshot_ts: ts,
            version: written.version.0,
            timestamp: Utc::now(),
        });
        Ok(written)
    }

    /// Palettes, most recently updated first, plus the total count
    pub async fn list(&self, page: Page) -> Result<(Vec<PaletteSummary>, i64)> {
        let rows = db::palettes::list(&self.pool, page.limit, page.offset).await?;
        let total = db::palettes::count(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = parse_doc(&row.doc)?;
            items.push(PaletteSummary {
                id: row.id,
                name: doc.name,
                experiment_id: doc.experiment_id,
                node_count: doc.nodes.len(),
                version: VersionToken(row.version),
                updated_at: row.updated_at,
            });
        }
        Ok((items, total))
    }

    fn emit_updated(&self, id: &str, version: VersionToken) {
        self.event_bus.emit_lossy(TrkEvent::PaletteUpdated {
            palette_id: id.to_string(),
            version: version.0,
            timestamp: Utc::now(),
        });
    }
}

fn parse_doc(json: &str) -> Result<CanvasDoc> {
    Ok(serde_json::from_str(json)?)
}

fn version_conflict(id: &str, expected: VersionToken, current: VersionToken) -> Error {
    Error::Conflict(format!(
        "version conflict on palette {}: expected {}, current {}",
        id, expected, current
    ))
}

fn node_not_found(palette_id: &str, node_id: &str) -> Error {
    Error::NotFound(format!("node {} in palette {}", node_id, palette_id))
}

fn one_micro() -> ChronoDuration {
    ChronoDuration::microseconds(1)
}

/// Canonical snapshot key for any RFC 3339 spelling of the same instant
fn normalize_ts(ts: &str) -> Result<String> {
    parse_rfc3339(ts)
        .map(to_rfc3339_micros)
        .ok_or_else(|| Error::InvalidInput(format!("malformed snapshot timestamp: {}", ts)))
}
