use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::store::{DamagePatch, DamageStore, PartScope};
use crate::{BoundingBox, Damage, DamageStatus, MIN_BOX_SIZE, Result, Severity};

/// Input for a manually drawn damage.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageDraft {
    pub report_id: String,
    pub image_id: String,
    pub section_id: String,
    pub part_name: String,
    pub location: String,
    pub damage_type: String,
    pub severity: Severity,
    pub bounding_box: BoundingBox,
    /// Link to an existing group instead of starting a new one.
    pub damage_group_id: Option<String>,
    /// Defaults to `validated`.
    pub status: Option<DamageStatus>,
    pub notes: String,
}

/// Non-status fields a reviewer can correct. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailsEdit {
    pub severity: Option<Severity>,
    pub damage_type: Option<String>,
    pub notes: Option<String>,
}

/// Applies reviewer decisions to damages.
///
/// Every mutation stamps `reviewed_by` and `reviewed_at`. Transitions are
/// unrestricted: a reviewer may revisit and correct any classification.
pub struct StatusMachine<'a, S: DamageStore + ?Sized> {
    store: &'a mut S,
    min_box_size: f64,
}

impl<'a, S: DamageStore + ?Sized> StatusMachine<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            min_box_size: MIN_BOX_SIZE,
        }
    }

    pub fn with_min_box_size(mut self, min_box_size: f64) -> Self {
        self.min_box_size = min_box_size;
        self
    }

    /// Set the status of one damage.
    pub fn set_status(
        &mut self,
        damage_id: &str,
        status: DamageStatus,
        reviewer_id: &str,
        notes: Option<&str>,
    ) -> Result<Damage> {
        let mut patch = stamped(reviewer_id);
        patch.status = Some(status);
        patch.notes = notes.map(str::to_owned);
        let damage = self.store.update_damage(damage_id, &patch)?;
        info!("{} set damage {} to {}", reviewer_id, damage_id, status);
        Ok(damage)
    }

    /// Advance one damage along the keyboard status cycle.
    pub fn cycle_status(&mut self, damage_id: &str, reviewer_id: &str) -> Result<Damage> {
        let current = self.store.get_damage(damage_id)?;
        self.set_status(damage_id, current.status.cycled(), reviewer_id, None)
    }

    /// Set the status of every damage sharing `group_id`.
    pub fn set_group_status(
        &mut self,
        group_id: &str,
        status: DamageStatus,
        reviewer_id: &str,
        notes: Option<&str>,
    ) -> Result<Vec<Damage>> {
        let mut patch = stamped(reviewer_id);
        patch.status = Some(status);
        patch.notes = notes.map(str::to_owned);
        let damages = self.store.update_damages_by_group(group_id, &patch)?;
        info!(
            "{} set {} damages of group {} to {}",
            reviewer_id,
            damages.len(),
            group_id,
            status
        );
        Ok(damages)
    }

    /// Validate the pending damages of a part; classified damages are left alone.
    ///
    /// Returns the damages that changed.
    pub fn validate_part(&mut self, scope: &PartScope, reviewer_id: &str) -> Result<Vec<Damage>> {
        let mut patch = stamped(reviewer_id);
        patch.status = Some(DamageStatus::Validated);
        let damages =
            self.store
                .update_damages_by_scope(scope, Some(DamageStatus::Pending), &patch)?;
        info!(
            "{} validated {} pending damages on {}/{}",
            reviewer_id,
            damages.len(),
            scope.section_id,
            scope.part_name
        );
        Ok(damages)
    }

    /// Mark every damage of a part as a false positive, overriding prior decisions.
    ///
    /// Callers must obtain explicit confirmation first.
    pub fn dismiss_part(&mut self, scope: &PartScope, reviewer_id: &str) -> Result<Vec<Damage>> {
        let mut patch = stamped(reviewer_id);
        patch.status = Some(DamageStatus::FalsePositive);
        let damages = self.store.update_damages_by_scope(scope, None, &patch)?;
        info!(
            "{} dismissed {} damages on {}/{}",
            reviewer_id,
            damages.len(),
            scope.section_id,
            scope.part_name
        );
        Ok(damages)
    }

    /// Insert a manually drawn damage.
    ///
    /// Manual annotations are fully trusted (`confidence_score = 1.0`).
    pub fn create_damage(&mut self, draft: DamageDraft, reviewer_id: &str) -> Result<Damage> {
        let bounding_box = draft.bounding_box.validated(self.min_box_size)?;
        let damage = Damage {
            id: Uuid::new_v4().to_string(),
            report_id: draft.report_id,
            image_id: draft.image_id,
            damage_group_id: draft
                .damage_group_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            section_id: draft.section_id,
            part_name: draft.part_name,
            location: draft.location,
            damage_type: draft.damage_type,
            severity: draft.severity,
            status: draft.status.unwrap_or(DamageStatus::Validated),
            bounding_box,
            confidence_score: 1.0,
            reviewed_by: Some(reviewer_id.to_owned()),
            reviewed_at: Some(Utc::now()),
            notes: draft.notes,
        };
        let created = self.store.create_damage(&damage)?;
        info!(
            "{} drew damage {} on image {}",
            reviewer_id, created.id, created.image_id
        );
        Ok(created)
    }

    /// Replace the bounding box of a damage.
    pub fn update_bounding_box(
        &mut self,
        damage_id: &str,
        bounding_box: BoundingBox,
        reviewer_id: &str,
    ) -> Result<Damage> {
        let mut patch = stamped(reviewer_id);
        patch.bounding_box = Some(bounding_box.validated(self.min_box_size)?);
        self.store.update_damage(damage_id, &patch)
    }

    /// Correct severity, type or notes of a damage.
    pub fn update_details(
        &mut self,
        damage_id: &str,
        edit: DetailsEdit,
        reviewer_id: &str,
    ) -> Result<Damage> {
        let mut patch = stamped(reviewer_id);
        patch.severity = edit.severity;
        patch.damage_type = edit.damage_type;
        patch.notes = edit.notes;
        self.store.update_damage(damage_id, &patch)
    }

    /// Manual deletion.
    pub fn delete_damage(&mut self, damage_id: &str, reviewer_id: &str) -> Result<()> {
        self.store.delete_damage(damage_id)?;
        info!("{} deleted damage {}", reviewer_id, damage_id);
        Ok(())
    }
}

fn stamped(reviewer_id: &str) -> DamagePatch {
    DamagePatch {
        reviewed_by: Some(reviewer_id.to_owned()),
        reviewed_at: Some(Utc::now()),
        ..DamagePatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::{DamageImage, ReviewError};

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let image = DamageImage {
            id: "img1".to_string(),
            report_id: "r1".to_string(),
            section_id: "exterior".to_string(),
            part_name: "Hood".to_string(),
            image_url: "hood.jpg".to_string(),
            width: Some(800),
            height: Some(600),
            order_index: 0,
        };
        let damages: Vec<Damage> = [
            ("d1", DamageStatus::Pending),
            ("d2", DamageStatus::FalsePositive),
            ("d3", DamageStatus::NonBillable),
            ("d4", DamageStatus::Validated),
        ]
        .into_iter()
        .map(|(id, status)| Damage {
            id: id.to_string(),
            report_id: "r1".to_string(),
            image_id: "img1".to_string(),
            damage_group_id: "g1".to_string(),
            section_id: "exterior".to_string(),
            part_name: "Hood".to_string(),
            location: "top".to_string(),
            damage_type: "hail".to_string(),
            severity: Severity::new(2).unwrap(),
            status,
            bounding_box: BoundingBox::new(0.0, 0.0, 40.0, 40.0),
            confidence_score: 0.7,
            reviewed_by: None,
            reviewed_at: None,
            notes: String::new(),
        })
        .collect();
        store.insert_batch(&[image], &damages).unwrap();
        store
    }

    fn hood() -> PartScope {
        PartScope::new("r1", "exterior", "Hood")
    }

    fn draft() -> DamageDraft {
        DamageDraft {
            report_id: "r1".to_string(),
            image_id: "img1".to_string(),
            section_id: "exterior".to_string(),
            part_name: "Hood".to_string(),
            location: "center".to_string(),
            damage_type: "manual".to_string(),
            severity: Severity::new(4).unwrap(),
            bounding_box: BoundingBox::new(5.0, 5.0, 30.0, 20.0),
            damage_group_id: None,
            status: None,
            notes: String::new(),
        }
    }

    #[test]
    fn set_status_stamps_reviewer() {
        let mut store = seeded();
        let damage = StatusMachine::new(&mut store)
            .set_status("d1", DamageStatus::NonBillable, "alice", Some("old dent"))
            .unwrap();
        assert_eq!(damage.status, DamageStatus::NonBillable);
        assert_eq!(damage.reviewed_by.as_deref(), Some("alice"));
        assert!(damage.reviewed_at.is_some());
        assert_eq!(damage.notes, "old dent");
    }

    #[test]
    fn set_status_on_missing_damage_is_not_found() {
        let mut store = seeded();
        let err = StatusMachine::new(&mut store)
            .set_status("missing", DamageStatus::Validated, "alice", None)
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }

    #[test]
    fn reviewed_damage_can_be_reclassified() {
        let mut store = seeded();
        let damage = StatusMachine::new(&mut store)
            .set_status("d4", DamageStatus::FalsePositive, "bob", None)
            .unwrap();
        assert_eq!(damage.status, DamageStatus::FalsePositive);
    }

    #[test]
    fn validate_part_only_touches_pending() {
        let mut store = seeded();
        let changed = StatusMachine::new(&mut store)
            .validate_part(&hood(), "alice")
            .unwrap();
        assert_eq!(changed.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["d1"]);

        assert_eq!(store.get_damage("d2").unwrap().status, DamageStatus::FalsePositive);
        assert_eq!(store.get_damage("d3").unwrap().status, DamageStatus::NonBillable);
        assert!(store.get_damage("d2").unwrap().reviewed_by.is_none());

        let before = store.get_damages("r1", None, None).unwrap();
        let again = StatusMachine::new(&mut store)
            .validate_part(&hood(), "alice")
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(store.get_damages("r1", None, None).unwrap(), before);
    }

    #[test]
    fn dismiss_part_overrides_everything() {
        let mut store = seeded();
        let changed = StatusMachine::new(&mut store)
            .dismiss_part(&hood(), "alice")
            .unwrap();
        assert_eq!(changed.len(), 4);
        assert!(store
            .get_damages("r1", None, None)
            .unwrap()
            .iter()
            .all(|d| d.status == DamageStatus::FalsePositive));
    }

    #[test]
    fn cycle_walks_the_transition_table() {
        let mut store = seeded();
        let mut machine = StatusMachine::new(&mut store);
        assert_eq!(machine.cycle_status("d1", "a").unwrap().status, DamageStatus::Validated);
        assert_eq!(machine.cycle_status("d1", "a").unwrap().status, DamageStatus::NonBillable);
        assert_eq!(
            machine.cycle_status("d1", "a").unwrap().status,
            DamageStatus::FalsePositive
        );
        assert_eq!(machine.cycle_status("d1", "a").unwrap().status, DamageStatus::Validated);
    }

    #[test]
    fn group_status_propagates() {
        let mut store = seeded();
        let changed = StatusMachine::new(&mut store)
            .set_group_status("g1", DamageStatus::Validated, "carol", None)
            .unwrap();
        assert_eq!(changed.len(), 4);
        assert!(changed.iter().all(|d| d.reviewed_by.as_deref() == Some("carol")));
    }

    #[test]
    fn created_damage_is_trusted_and_validated() {
        let mut store = seeded();
        let damage = StatusMachine::new(&mut store)
            .create_damage(draft(), "alice")
            .unwrap();
        assert_eq!(damage.status, DamageStatus::Validated);
        assert_eq!(damage.confidence_score, 1.0);
        assert_eq!(damage.reviewed_by.as_deref(), Some("alice"));
        assert!(!damage.damage_group_id.is_empty());
        assert_ne!(damage.damage_group_id, "g1");
    }

    #[test]
    fn created_damage_can_join_existing_group() {
        let mut store = seeded();
        let mut linked = draft();
        linked.damage_group_id = Some("g1".to_string());
        StatusMachine::new(&mut store)
            .create_damage(linked, "alice")
            .unwrap();
        assert_eq!(store.get_damages_by_group("g1").unwrap().len(), 5);
    }

    #[test]
    fn tiny_box_is_rejected() {
        let mut store = seeded();
        let mut tiny = draft();
        tiny.bounding_box = BoundingBox::new(0.0, 0.0, 4.0, 40.0);
        let err = StatusMachine::new(&mut store)
            .create_damage(tiny, "alice")
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidBoundingBox { .. }));
        assert_eq!(store.get_damages("r1", None, None).unwrap().len(), 4);
    }

    #[test]
    fn details_and_box_edits_keep_status() {
        let mut store = seeded();
        let mut machine = StatusMachine::new(&mut store);
        machine
            .update_bounding_box("d3", BoundingBox::new(1.0, 2.0, 50.0, 60.0), "dan")
            .unwrap();
        let damage = machine
            .update_details(
                "d3",
                DetailsEdit {
                    severity: Some(Severity::new(5).unwrap()),
                    notes: Some("deep".to_string()),
                    ..DetailsEdit::default()
                },
                "dan",
            )
            .unwrap();
        assert_eq!(damage.status, DamageStatus::NonBillable);
        assert_eq!(damage.bounding_box, BoundingBox::new(1.0, 2.0, 50.0, 60.0));
        assert_eq!(damage.severity.value(), 5);
        assert_eq!(damage.damage_type, "hail");
        assert_eq!(damage.notes, "deep");
    }
}
