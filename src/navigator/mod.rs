pub mod keymap;

use std::collections::{BTreeSet, HashSet};

use crate::store::{DamageStore, PartScope};
use crate::{Damage, DamageImage, Result, SectionReviewInfo};

/// Where the reviewer goes once the current part is fully reviewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    NextPart { section_id: String, part_name: String },
    NextSection { section_id: String, part_name: String },
    /// Past the last part, back to the first part still holding pending damages.
    Unfinished { section_id: String, part_name: String },
    ReportComplete,
}

/// Reviewer position and the loaded part, as a plain value.
///
/// Moves that need data take the store explicitly; a failed read leaves the
/// session unchanged.
#[derive(Debug, Clone, Default)]
pub struct ReviewSession {
    pub report_id: String,
    sections: Vec<SectionReviewInfo>,
    current_section_id: Option<String>,
    current_part_name: Option<String>,
    current_image_index: usize,
    selected_damage_id: Option<String>,
    images: Vec<DamageImage>,
    damages: Vec<Damage>,
    expanded_sections: BTreeSet<String>,
    visited_sections: HashSet<String>,
}

impl ReviewSession {
    pub fn new(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            ..Self::default()
        }
    }

    pub fn sections(&self) -> &[SectionReviewInfo] {
        &self.sections
    }

    /// Replace the worklist after the report was reloaded.
    pub fn set_worklist(&mut self, sections: Vec<SectionReviewInfo>) {
        self.sections = sections;
    }

    pub fn visited_sections(&self) -> &HashSet<String> {
        &self.visited_sections
    }

    pub fn is_expanded(&self, section_id: &str) -> bool {
        self.expanded_sections.contains(section_id)
    }

    pub fn toggle_expanded(&mut self, section_id: &str) {
        if !self.expanded_sections.remove(section_id) {
            self.expanded_sections.insert(section_id.to_owned());
        }
    }

    pub fn current_section_id(&self) -> Option<&str> {
        self.current_section_id.as_deref()
    }

    pub fn current_part_name(&self) -> Option<&str> {
        self.current_part_name.as_deref()
    }

    pub fn current_scope(&self) -> Option<PartScope> {
        match (&self.current_section_id, &self.current_part_name) {
            (Some(section), Some(part)) => {
                Some(PartScope::new(self.report_id.clone(), section.clone(), part.clone()))
            }
            _ => None,
        }
    }

    pub fn current_image_index(&self) -> usize {
        self.current_image_index
    }

    pub fn selected_damage_id(&self) -> Option<&str> {
        self.selected_damage_id.as_deref()
    }

    pub fn images(&self) -> &[DamageImage] {
        &self.images
    }

    /// Damages of the current part, all images.
    pub fn part_damages(&self) -> &[Damage] {
        &self.damages
    }

    pub fn current_image(&self) -> Option<&DamageImage> {
        self.images.get(self.current_image_index)
    }

    /// Damages on the current image, in render order.
    pub fn current_image_damages(&self) -> Vec<Damage> {
        match self.current_image() {
            Some(image) => self
                .damages
                .iter()
                .filter(|d| d.image_id == image.id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn selected_damage(&self) -> Option<&Damage> {
        let id = self.selected_damage_id.as_deref()?;
        self.damages.iter().find(|d| d.id == id)
    }

    /// Load a part and move to its first image with nothing selected.
    pub fn select_part<S: DamageStore + ?Sized>(
        &mut self,
        store: &S,
        section_id: &str,
        part_name: &str,
    ) -> Result<()> {
        let images = store.get_images(&self.report_id, Some(section_id), Some(part_name))?;
        let damages = store.get_damages(&self.report_id, Some(section_id), Some(part_name))?;

        self.current_section_id = Some(section_id.to_owned());
        self.current_part_name = Some(part_name.to_owned());
        self.current_image_index = 0;
        self.selected_damage_id = None;
        self.images = images;
        self.damages = damages;
        self.visited_sections.insert(section_id.to_owned());
        self.expanded_sections.insert(section_id.to_owned());
        Ok(())
    }

    /// Reload the current part, keeping position where it still exists.
    pub fn refresh_part<S: DamageStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        let Some(scope) = self.current_scope() else {
            return Ok(());
        };
        let images = store.get_images(&scope.report_id, Some(&scope.section_id), Some(&scope.part_name))?;
        let damages =
            store.get_damages(&scope.report_id, Some(&scope.section_id), Some(&scope.part_name))?;

        self.images = images;
        self.damages = damages;
        self.current_image_index = self
            .current_image_index
            .min(self.images.len().saturating_sub(1));
        let still_on_image = self
            .selected_damage_id
            .as_deref()
            .is_some_and(|id| self.current_image_damages().iter().any(|d| d.id == id));
        if !still_on_image {
            self.selected_damage_id = None;
        }
        Ok(())
    }

    /// Move to the next image. Returns false at the last image.
    pub fn next_image(&mut self) -> bool {
        if self.current_image_index + 1 < self.images.len() {
            self.current_image_index += 1;
            self.selected_damage_id = None;
            true
        } else {
            false
        }
    }

    /// Move to the previous image. Returns false at the first image.
    pub fn previous_image(&mut self) -> bool {
        if self.current_image_index > 0 && !self.images.is_empty() {
            self.current_image_index -= 1;
            self.selected_damage_id = None;
            true
        } else {
            false
        }
    }

    /// Select a damage on the current image.
    pub fn select_damage(&mut self, damage_id: &str) -> bool {
        let on_image = self
            .current_image_damages()
            .iter()
            .any(|d| d.id == damage_id);
        if on_image {
            self.selected_damage_id = Some(damage_id.to_owned());
        }
        on_image
    }

    pub fn clear_selection(&mut self) {
        self.selected_damage_id = None;
    }

    /// Select the next damage on the current image, stopping at the last.
    pub fn select_next_damage(&mut self) {
        self.step_damage(true);
    }

    /// Select the previous damage on the current image, stopping at the first.
    pub fn select_previous_damage(&mut self) {
        self.step_damage(false);
    }

    fn step_damage(&mut self, forward: bool) {
        let ids: Vec<String> = self
            .current_image_damages()
            .into_iter()
            .map(|d| d.id)
            .collect();
        if ids.is_empty() {
            return;
        }
        let position = self
            .selected_damage_id
            .as_ref()
            .and_then(|selected| ids.iter().position(|id| id == selected));
        let target = match position {
            None => 0,
            Some(p) if forward => (p + 1).min(ids.len() - 1),
            Some(p) => p.saturating_sub(1),
        };
        self.selected_damage_id = Some(ids[target].clone());
    }

    fn section_index(&self, section_id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.section_id == section_id)
    }

    fn current_positions(&self) -> Option<(usize, Option<usize>)> {
        let section_idx = self.section_index(self.current_section_id.as_deref()?)?;
        let part = self.current_part_name.as_deref()?;
        let part_idx = self.sections[section_idx]
            .parts
            .iter()
            .position(|p| p.part_name == part);
        Some((section_idx, part_idx))
    }

    /// Next part within the current section, if any.
    pub fn next_part_target(&self) -> Option<(String, String)> {
        let (section_idx, part_idx) = self.current_positions()?;
        let section = &self.sections[section_idx];
        let next = section.parts.get(part_idx? + 1)?;
        Some((section.section_id.clone(), next.part_name.clone()))
    }

    /// Move to the next part of the current section. Never crosses sections.
    pub fn next_part<S: DamageStore + ?Sized>(&mut self, store: &S) -> Result<bool> {
        match self.next_part_target() {
            Some((section, part)) => {
                self.select_part(store, &section, &part)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Neighbouring part in the flattened worklist (`delta` is +1 or -1).
    pub fn adjacent_part_target(&self, delta: isize) -> Option<(String, String)> {
        let flat: Vec<(&str, &str)> = self
            .sections
            .iter()
            .flat_map(|s| {
                s.parts
                    .iter()
                    .map(move |p| (s.section_id.as_str(), p.part_name.as_str()))
            })
            .collect();
        if flat.is_empty() {
            return None;
        }
        let current = match (&self.current_section_id, &self.current_part_name) {
            (Some(s), Some(p)) => flat.iter().position(|(fs, fp)| fs == s && fp == p),
            _ => None,
        };
        let target = match current {
            None => 0,
            Some(i) => {
                let t = i as isize + delta;
                if t < 0 || t as usize >= flat.len() {
                    return None;
                }
                t as usize
            }
        };
        let (section, part) = flat[target];
        Some((section.to_owned(), part.to_owned()))
    }

    /// Where to go once the current part is done.
    pub fn advance_target(&self) -> Advance {
        let Some((section_idx, part_idx)) = self.current_positions() else {
            return match self.sections.first().and_then(|s| s.parts.first().map(|p| (s, p))) {
                Some((s, p)) if self.current_section_id.is_none() => Advance::NextSection {
                    section_id: s.section_id.clone(),
                    part_name: p.part_name.clone(),
                },
                _ => Advance::ReportComplete,
            };
        };
        let section = &self.sections[section_idx];
        if let Some(next) = part_idx.and_then(|i| section.parts.get(i + 1)) {
            return Advance::NextPart {
                section_id: section.section_id.clone(),
                part_name: next.part_name.clone(),
            };
        }
        if let Some(next) = self.sections[section_idx + 1..].iter().find_map(|s| {
            s.parts.first().map(|p| Advance::NextSection {
                section_id: s.section_id.clone(),
                part_name: p.part_name.clone(),
            })
        }) {
            return next;
        }
        self.first_unfinished_part()
            .map(|(section_id, part_name)| Advance::Unfinished {
                section_id,
                part_name,
            })
            .unwrap_or(Advance::ReportComplete)
    }

    /// First incomplete part in worklist order, other than the current one.
    fn first_unfinished_part(&self) -> Option<(String, String)> {
        let current = (
            self.current_section_id.as_deref(),
            self.current_part_name.as_deref(),
        );
        self.sections.iter().find_map(|s| {
            s.parts
                .iter()
                .find(|p| {
                    !p.is_complete
                        && (Some(s.section_id.as_str()), Some(p.part_name.as_str())) != current
                })
                .map(|p| (s.section_id.clone(), p.part_name.clone()))
        })
    }

    /// Apply the post-completion policy: next part, else the first part of the
    /// next section (expanded), else the first unfinished part, else report
    /// complete.
    pub fn advance_after_part_completion<S: DamageStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<Advance> {
        let advance = self.advance_target();
        match &advance {
            Advance::NextPart {
                section_id,
                part_name,
            }
            | Advance::NextSection {
                section_id,
                part_name,
            }
            | Advance::Unfinished {
                section_id,
                part_name,
            } => self.select_part(store, section_id, part_name)?,
            Advance::ReportComplete => {}
        }
        Ok(advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{compute_part_info, compute_section_info};
    use crate::store::SqliteStore;
    use crate::{BoundingBox, DamageStatus, Severity};

    fn damage(id: &str, image: &str, section: &str, part: &str) -> Damage {
        Damage {
            id: id.to_string(),
            report_id: "r1".to_string(),
            image_id: image.to_string(),
            damage_group_id: id.to_string(),
            section_id: section.to_string(),
            part_name: part.to_string(),
            location: String::new(),
            damage_type: "dent".to_string(),
            severity: Severity::new(2).unwrap(),
            status: DamageStatus::Pending,
            bounding_box: BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            confidence_score: 0.5,
            reviewed_by: None,
            reviewed_at: None,
            notes: String::new(),
        }
    }

    fn image(id: &str, section: &str, part: &str, order: u32) -> DamageImage {
        DamageImage {
            id: id.to_string(),
            report_id: "r1".to_string(),
            section_id: section.to_string(),
            part_name: part.to_string(),
            image_url: String::new(),
            width: Some(100),
            height: Some(100),
            order_index: order,
        }
    }

    fn section(id: &str, parts: &[&str]) -> SectionReviewInfo {
        section_with_status(id, parts, DamageStatus::Pending)
    }

    fn section_with_status(id: &str, parts: &[&str], status: DamageStatus) -> SectionReviewInfo {
        let parts = parts
            .iter()
            .map(|p| {
                let mut d = damage("x", "i", id, p);
                d.status = status;
                compute_part_info(id, p, vec![], vec![d])
            })
            .collect();
        compute_section_info(id, id, parts, false)
    }

    /// Section A: Door (two images, three damages), Hood. Section B: Roof.
    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let images = vec![
            image("door-1", "A", "Door", 0),
            image("door-2", "A", "Door", 1),
            image("hood-1", "A", "Hood", 2),
            image("roof-1", "B", "Roof", 3),
        ];
        let damages = vec![
            damage("d1", "door-1", "A", "Door"),
            damage("d2", "door-1", "A", "Door"),
            damage("d3", "door-2", "A", "Door"),
            damage("h1", "hood-1", "A", "Hood"),
            damage("r1", "roof-1", "B", "Roof"),
        ];
        store.insert_batch(&images, &damages).unwrap();
        store
    }

    fn session() -> ReviewSession {
        let mut session = ReviewSession::new("r1");
        session.set_worklist(vec![section("A", &["Door", "Hood"]), section("B", &["Roof"])]);
        session
    }

    #[test]
    fn select_part_resets_position() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();
        session.next_image();
        session.select_next_damage();

        session.select_part(&store, "A", "Door").unwrap();
        assert_eq!(session.current_image_index(), 0);
        assert_eq!(session.selected_damage_id(), None);
        assert_eq!(session.images().len(), 2);
        assert_eq!(session.part_damages().len(), 3);
        assert!(session.is_expanded("A"));
    }

    #[test]
    fn image_navigation_clamps() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();

        assert!(!session.previous_image());
        assert_eq!(session.current_image_index(), 0);
        assert!(session.next_image());
        assert!(!session.next_image());
        assert_eq!(session.current_image_index(), 1);
        assert!(session.previous_image());
        assert_eq!(session.current_image_index(), 0);
    }

    #[test]
    fn image_change_clears_selection() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();
        session.select_next_damage();
        assert_eq!(session.selected_damage_id(), Some("d1"));
        session.next_image();
        assert_eq!(session.selected_damage_id(), None);
    }

    #[test]
    fn damage_cycling_stops_at_ends() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();

        session.select_previous_damage();
        assert_eq!(session.selected_damage_id(), Some("d1"));
        session.select_next_damage();
        assert_eq!(session.selected_damage_id(), Some("d2"));
        session.select_next_damage();
        assert_eq!(session.selected_damage_id(), Some("d2"));
        session.select_previous_damage();
        session.select_previous_damage();
        assert_eq!(session.selected_damage_id(), Some("d1"));
    }

    #[test]
    fn select_damage_ignores_other_images() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();
        assert!(!session.select_damage("d3"));
        assert!(session.select_damage("d2"));
    }

    #[test]
    fn next_part_stays_in_section() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();
        assert!(session.next_part(&store).unwrap());
        assert_eq!(session.current_part_name(), Some("Hood"));
        assert!(!session.next_part(&store).unwrap());
        assert_eq!(session.current_part_name(), Some("Hood"));
    }

    #[test]
    fn advance_crosses_sections_then_wraps_to_unfinished() {
        let store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();

        let advance = session.advance_after_part_completion(&store).unwrap();
        assert_eq!(
            advance,
            Advance::NextPart {
                section_id: "A".to_string(),
                part_name: "Hood".to_string()
            }
        );

        let advance = session.advance_after_part_completion(&store).unwrap();
        assert_eq!(
            advance,
            Advance::NextSection {
                section_id: "B".to_string(),
                part_name: "Roof".to_string()
            }
        );
        assert!(session.is_expanded("B"));
        assert_eq!(session.current_section_id(), Some("B"));

        let advance = session.advance_after_part_completion(&store).unwrap();
        assert_eq!(
            advance,
            Advance::Unfinished {
                section_id: "A".to_string(),
                part_name: "Door".to_string()
            }
        );
        assert_eq!(session.current_part_name(), Some("Door"));
    }

    #[test]
    fn advance_from_last_part_completes_only_when_nothing_is_pending() {
        let store = store();
        let mut session = ReviewSession::new("r1");
        session.set_worklist(vec![
            section_with_status("A", &["Door", "Hood"], DamageStatus::Validated),
            section_with_status("B", &["Roof"], DamageStatus::FalsePositive),
        ]);
        session.select_part(&store, "B", "Roof").unwrap();

        let advance = session.advance_after_part_completion(&store).unwrap();
        assert_eq!(advance, Advance::ReportComplete);
        assert_eq!(session.current_part_name(), Some("Roof"));
    }

    #[test]
    fn advance_from_last_part_skips_finished_parts() {
        let store = store();
        let mut session = ReviewSession::new("r1");
        session.set_worklist(vec![
            section_with_status("A", &["Door"], DamageStatus::Validated),
            section("A2", &["Hood"]),
            section_with_status("B", &["Roof"], DamageStatus::Validated),
        ]);
        session.select_part(&store, "B", "Roof").unwrap();

        assert_eq!(
            session.advance_target(),
            Advance::Unfinished {
                section_id: "A2".to_string(),
                part_name: "Hood".to_string()
            }
        );
    }

    #[test]
    fn adjacent_part_walks_flattened_worklist() {
        let store = store();
        let mut session = session();
        assert_eq!(
            session.adjacent_part_target(1),
            Some(("A".to_string(), "Door".to_string()))
        );
        session.select_part(&store, "A", "Hood").unwrap();
        assert_eq!(
            session.adjacent_part_target(1),
            Some(("B".to_string(), "Roof".to_string()))
        );
        assert_eq!(
            session.adjacent_part_target(-1),
            Some(("A".to_string(), "Door".to_string()))
        );
        session.select_part(&store, "B", "Roof").unwrap();
        assert_eq!(session.adjacent_part_target(1), None);
    }

    #[test]
    fn refresh_keeps_valid_selection() {
        let mut store = store();
        let mut session = session();
        session.select_part(&store, "A", "Door").unwrap();
        session.select_next_damage();
        session.select_next_damage();
        store.delete_damage("d1").unwrap();

        session.refresh_part(&store).unwrap();
        assert_eq!(session.selected_damage_id(), Some("d2"));
        assert_eq!(session.part_damages().len(), 2);

        store.delete_damage("d2").unwrap();
        session.refresh_part(&store).unwrap();
        assert_eq!(session.selected_damage_id(), None);
    }
}
