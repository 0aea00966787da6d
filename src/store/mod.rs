use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use std::path::Path;

use crate::{BoundingBox, Damage, DamageImage, DamageStatus, Result, ReviewError, Severity};

/// The (report, section, part) key that scopes bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartScope {
    pub report_id: String,
    pub section_id: String,
    pub part_name: String,
}

impl PartScope {
    pub fn new(
        report_id: impl Into<String>,
        section_id: impl Into<String>,
        part_name: impl Into<String>,
    ) -> Self {
        Self {
            report_id: report_id.into(),
            section_id: section_id.into(),
            part_name: part_name.into(),
        }
    }
}

/// Partial update of a damage. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DamagePatch {
    pub status: Option<DamageStatus>,
    pub severity: Option<Severity>,
    pub damage_type: Option<String>,
    pub bounding_box: Option<BoundingBox>,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Keyed persistence of images and damages.
///
/// Every write is acknowledged before it returns; a failed write leaves the
/// stored records unchanged.
pub trait DamageStore {
    fn get_images(
        &self,
        report_id: &str,
        section_id: Option<&str>,
        part_name: Option<&str>,
    ) -> Result<Vec<DamageImage>>;

    fn get_damages(
        &self,
        report_id: &str,
        section_id: Option<&str>,
        part_name: Option<&str>,
    ) -> Result<Vec<Damage>>;

    /// Fails with `NotFound` if no damage has this id.
    fn get_damage(&self, id: &str) -> Result<Damage>;

    fn get_damages_by_group(&self, group_id: &str) -> Result<Vec<Damage>>;

    fn create_damage(&mut self, damage: &Damage) -> Result<Damage>;

    /// Fails with `NotFound` if no damage has this id.
    fn update_damage(&mut self, id: &str, patch: &DamagePatch) -> Result<Damage>;

    /// Patch every damage of a part, optionally only those currently in
    /// `only_status`. Returns the updated damages.
    fn update_damages_by_scope(
        &mut self,
        scope: &PartScope,
        only_status: Option<DamageStatus>,
        patch: &DamagePatch,
    ) -> Result<Vec<Damage>>;

    fn update_damages_by_group(&mut self, group_id: &str, patch: &DamagePatch)
    -> Result<Vec<Damage>>;

    /// Fails with `NotFound` if no damage has this id.
    fn delete_damage(&mut self, id: &str) -> Result<()>;

    /// Record resolved pixel dimensions of an image.
    fn set_image_dimensions(&mut self, image_id: &str, width: u32, height: u32) -> Result<()>;

    /// Insert images and damages atomically.
    fn insert_batch(&mut self, images: &[DamageImage], damages: &[Damage]) -> Result<()>;

    /// All report ids with stored images or damages, sorted.
    fn list_reports(&self) -> Result<Vec<String>>;
}

const IMAGE_COLUMNS: &str =
    "id, report_id, section_id, part_name, image_url, width, height, order_index";

const DAMAGE_COLUMNS: &str = "id, report_id, image_id, damage_group_id, section_id, part_name, \
     location, damage_type, severity, status, bbox_x, bbox_y, bbox_width, bbox_height, \
     confidence_score, reviewed_by, reviewed_at, notes";

const UPDATE_DAMAGE_SET: &str = "UPDATE damages SET
        status = COALESCE(?2, status),
        severity = COALESCE(?3, severity),
        damage_type = COALESCE(?4, damage_type),
        bbox_x = COALESCE(?5, bbox_x),
        bbox_y = COALESCE(?6, bbox_y),
        bbox_width = COALESCE(?7, bbox_width),
        bbox_height = COALESCE(?8, bbox_height),
        notes = COALESCE(?9, notes),
        reviewed_by = COALESCE(?10, reviewed_by),
        reviewed_at = COALESCE(?11, reviewed_at)
     WHERE id = ?1";

/// SQLite-backed damage store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    ///
    /// Creates the necessary tables if they don't exist.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                part_name TEXT NOT NULL,
                image_url TEXT NOT NULL,
                width INTEGER,
                height INTEGER,
                order_index INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS damages (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL,
                image_id TEXT NOT NULL,
                damage_group_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                part_name TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                damage_type TEXT NOT NULL,
                severity INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                bbox_x REAL NOT NULL,
                bbox_y REAL NOT NULL,
                bbox_width REAL NOT NULL,
                bbox_height REAL NOT NULL,
                confidence_score REAL NOT NULL,
                reviewed_by TEXT,
                reviewed_at TEXT,
                notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS damages_scope
                ON damages (report_id, section_id, part_name);
            CREATE INDEX IF NOT EXISTS damages_group ON damages (damage_group_id);
            CREATE INDEX IF NOT EXISTS images_scope
                ON images (report_id, section_id, part_name);",
        )?;
        Ok(Self { conn })
    }
}

impl DamageStore for SqliteStore {
    fn get_images(
        &self,
        report_id: &str,
        section_id: Option<&str>,
        part_name: Option<&str>,
    ) -> Result<Vec<DamageImage>> {
        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE report_id = ?1 AND (?2 IS NULL OR section_id = ?2)
               AND (?3 IS NULL OR part_name = ?3)
             ORDER BY order_index, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let images = stmt
            .query_map(params![report_id, section_id, part_name], row_to_image)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(images)
    }

    fn get_damages(
        &self,
        report_id: &str,
        section_id: Option<&str>,
        part_name: Option<&str>,
    ) -> Result<Vec<Damage>> {
        query_damages(
            &self.conn,
            "report_id = ?1 AND (?2 IS NULL OR section_id = ?2) AND (?3 IS NULL OR part_name = ?3)",
            params![report_id, section_id, part_name],
        )
    }

    fn get_damage(&self, id: &str) -> Result<Damage> {
        find_damage(&self.conn, id)?.ok_or_else(|| ReviewError::not_found("damage", id))
    }

    fn get_damages_by_group(&self, group_id: &str) -> Result<Vec<Damage>> {
        query_damages(&self.conn, "damage_group_id = ?1", params![group_id])
    }

    fn create_damage(&mut self, damage: &Damage) -> Result<Damage> {
        insert_damage(&self.conn, damage)?;
        debug!(
            "created damage {} on image {} ({})",
            damage.id, damage.image_id, damage.status
        );
        self.get_damage(&damage.id)
    }

    fn update_damage(&mut self, id: &str, patch: &DamagePatch) -> Result<Damage> {
        if apply_patch(&self.conn, id, patch)? == 0 {
            return Err(ReviewError::not_found("damage", id));
        }
        debug!("updated damage {}", id);
        self.get_damage(id)
    }

    fn update_damages_by_scope(
        &mut self,
        scope: &PartScope,
        only_status: Option<DamageStatus>,
        patch: &DamagePatch,
    ) -> Result<Vec<Damage>> {
        let tx = self.conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM damages
                 WHERE report_id = ?1 AND section_id = ?2 AND part_name = ?3
                   AND (?4 IS NULL OR status = ?4)
                 ORDER BY rowid",
            )?;
            stmt.query_map(
                params![
                    scope.report_id,
                    scope.section_id,
                    scope.part_name,
                    only_status.map(DamageStatus::as_str)
                ],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        for id in &ids {
            apply_patch(&tx, id, patch)?;
        }

        let mut updated = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(damage) = find_damage(&tx, id)? {
                updated.push(damage);
            }
        }
        tx.commit()?;

        debug!(
            "bulk-updated {} damages in {}/{}/{}",
            updated.len(),
            scope.report_id,
            scope.section_id,
            scope.part_name
        );
        Ok(updated)
    }

    fn update_damages_by_group(
        &mut self,
        group_id: &str,
        patch: &DamagePatch,
    ) -> Result<Vec<Damage>> {
        let tx = self.conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM damages WHERE damage_group_id = ?1 ORDER BY rowid")?;
            stmt.query_map(params![group_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        if ids.is_empty() {
            return Err(ReviewError::not_found("damage group", group_id));
        }
        for id in &ids {
            apply_patch(&tx, id, patch)?;
        }
        let updated = query_damages(&tx, "damage_group_id = ?1", params![group_id])?;
        tx.commit()?;
        Ok(updated)
    }

    fn delete_damage(&mut self, id: &str) -> Result<()> {
        let count = self
            .conn
            .execute("DELETE FROM damages WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(ReviewError::not_found("damage", id));
        }
        debug!("deleted damage {}", id);
        Ok(())
    }

    fn set_image_dimensions(&mut self, image_id: &str, width: u32, height: u32) -> Result<()> {
        let count = self.conn.execute(
            "UPDATE images SET width = ?2, height = ?3 WHERE id = ?1",
            params![image_id, width, height],
        )?;
        if count == 0 {
            return Err(ReviewError::not_found("image", image_id));
        }
        Ok(())
    }

    fn insert_batch(&mut self, images: &[DamageImage], damages: &[Damage]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for image in images {
            tx.execute(
                "INSERT INTO images (id, report_id, section_id, part_name, image_url, width, height, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    image.id,
                    image.report_id,
                    image.section_id,
                    image.part_name,
                    image.image_url,
                    image.width,
                    image.height,
                    image.order_index
                ],
            )?;
        }
        for damage in damages {
            insert_damage(&tx, damage)?;
        }
        tx.commit()?;
        debug!(
            "inserted {} images and {} damages",
            images.len(),
            damages.len()
        );
        Ok(())
    }

    fn list_reports(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT report_id FROM images UNION SELECT report_id FROM damages ORDER BY 1",
        )?;

        let reports = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(reports)
    }
}

/// Raw damage row, before enum and range validation.
struct DamageRow {
    id: String,
    report_id: String,
    image_id: String,
    damage_group_id: String,
    section_id: String,
    part_name: String,
    location: String,
    damage_type: String,
    severity: u8,
    status: String,
    bounding_box: BoundingBox,
    confidence_score: f64,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    notes: String,
}

impl DamageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            report_id: row.get(1)?,
            image_id: row.get(2)?,
            damage_group_id: row.get(3)?,
            section_id: row.get(4)?,
            part_name: row.get(5)?,
            location: row.get(6)?,
            damage_type: row.get(7)?,
            severity: row.get(8)?,
            status: row.get(9)?,
            bounding_box: BoundingBox::new(row.get(10)?, row.get(11)?, row.get(12)?, row.get(13)?),
            confidence_score: row.get(14)?,
            reviewed_by: row.get(15)?,
            reviewed_at: row.get(16)?,
            notes: row.get(17)?,
        })
    }

    fn into_damage(self) -> Result<Damage> {
        let reviewed_at = self.reviewed_at.as_deref().and_then(|s| {
            match DateTime::parse_from_rfc3339(s) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    warn!("damage {} has unreadable reviewed_at {:?}: {}", self.id, s, e);
                    None
                }
            }
        });
        Ok(Damage {
            severity: Severity::new(self.severity)?,
            status: self.status.parse()?,
            id: self.id,
            report_id: self.report_id,
            image_id: self.image_id,
            damage_group_id: self.damage_group_id,
            section_id: self.section_id,
            part_name: self.part_name,
            location: self.location,
            damage_type: self.damage_type,
            bounding_box: self.bounding_box,
            confidence_score: self.confidence_score,
            reviewed_by: self.reviewed_by,
            reviewed_at,
            notes: self.notes,
        })
    }
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<DamageImage> {
    Ok(DamageImage {
        id: row.get(0)?,
        report_id: row.get(1)?,
        section_id: row.get(2)?,
        part_name: row.get(3)?,
        image_url: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        order_index: row.get(7)?,
    })
}

fn query_damages<P: Params>(conn: &Connection, filter: &str, params: P) -> Result<Vec<Damage>> {
    let sql = format!("SELECT {DAMAGE_COLUMNS} FROM damages WHERE {filter} ORDER BY rowid");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, DamageRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(DamageRow::into_damage).collect()
}

fn find_damage(conn: &Connection, id: &str) -> Result<Option<Damage>> {
    let sql = format!("SELECT {DAMAGE_COLUMNS} FROM damages WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], DamageRow::from_row)
        .optional()?;
    row.map(DamageRow::into_damage).transpose()
}

fn insert_damage(conn: &Connection, damage: &Damage) -> Result<()> {
    let sql = format!(
        "INSERT INTO damages ({DAMAGE_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
    );
    conn.execute(
        &sql,
        params![
            damage.id,
            damage.report_id,
            damage.image_id,
            damage.damage_group_id,
            damage.section_id,
            damage.part_name,
            damage.location,
            damage.damage_type,
            damage.severity.value(),
            damage.status.as_str(),
            damage.bounding_box.x,
            damage.bounding_box.y,
            damage.bounding_box.width,
            damage.bounding_box.height,
            damage.confidence_score,
            damage.reviewed_by,
            damage.reviewed_at.map(|t| t.to_rfc3339()),
            damage.notes
        ],
    )?;
    Ok(())
}

/// Apply a patch to one damage, returning the number of rows touched.
fn apply_patch(conn: &Connection, id: &str, patch: &DamagePatch) -> Result<usize> {
    let bbox = patch.bounding_box;
    let count = conn.execute(
        UPDATE_DAMAGE_SET,
        params![
            id,
            patch.status.map(DamageStatus::as_str),
            patch.severity.map(Severity::value),
            patch.damage_type,
            bbox.map(|b| b.x),
            bbox.map(|b| b.y),
            bbox.map(|b| b.width),
            bbox.map(|b| b.height),
            patch.notes,
            patch.reviewed_by,
            patch.reviewed_at.map(|t| t.to_rfc3339())
        ],
    )?;
    Ok(count)
}
