use std::path::Path;

use log::{debug, info, warn};

use crate::completion::{ReportProgress, build_worklist, is_report_complete, report_progress};
use crate::config::{ReviewConfig, SectionDef};
use crate::coords::Size;
use crate::navigator::{Advance, ReviewSession};
use crate::recap::{Recap, project};
use crate::status::{DamageDraft, DetailsEdit, StatusMachine};
use crate::store::{DamageStore, PartScope};
use crate::{BoundingBox, Damage, DamageImage, DamageStatus, Result, ReviewError, Severity};

/// Smallest canvas assumed for an image whose size cannot be read.
const FALLBACK_WIDTH: f64 = 640.0;
const FALLBACK_HEIGHT: f64 = 480.0;

/// Result of a bulk part operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub changed: usize,
    /// Set when the part was complete afterwards and the session moved on.
    pub advance: Option<Advance>,
}

type CompletionCallback = Box<dyn FnMut(&Recap)>;

/// Drives one reviewer through one report.
///
/// Every mutation is written to the store first; only then is the report
/// reloaded and the session updated. A failed write returns the error and
/// leaves the session as it was. A read that fails after a successful write
/// does not undo it: the write is reported as done and the read error is kept
/// for [`ReviewWorkflow::take_reload_error`].
pub struct ReviewWorkflow<S: DamageStore> {
    store: S,
    session: ReviewSession,
    reviewer_id: String,
    min_box_size: f64,
    manual_damage_type: String,
    manual_severity: Severity,
    sections: Vec<SectionDef>,
    report_images: Vec<DamageImage>,
    report_damages: Vec<Damage>,
    complete: bool,
    last_advance: Option<Advance>,
    reload_error: Option<ReviewError>,
    on_report_complete: Option<CompletionCallback>,
}

impl<S: DamageStore> ReviewWorkflow<S> {
    /// Load a report and position the session on its first part.
    pub fn open(store: S, report_id: &str, config: &ReviewConfig) -> Result<Self> {
        let mut workflow = Self {
            store,
            session: ReviewSession::new(report_id),
            reviewer_id: config.reviewer_id.clone(),
            min_box_size: config.min_box_size,
            manual_damage_type: config.manual_damage_type.clone(),
            manual_severity: config.manual_severity,
            sections: config.sections.clone(),
            report_images: Vec::new(),
            report_damages: Vec::new(),
            complete: false,
            last_advance: None,
            reload_error: None,
            on_report_complete: None,
        };
        workflow.reload()?;
        workflow.complete = is_report_complete(&workflow.report_damages);

        let first = workflow.session.adjacent_part_target(1);
        if let Some((section, part)) = first {
            workflow.select_part(&section, &part)?;
        }
        info!(
            "Opened report {} with {} damages",
            report_id,
            workflow.report_damages.len()
        );
        Ok(workflow)
    }

    /// Register the hand-off to the recap. Fires once per transition into
    /// completion.
    pub fn on_report_complete(&mut self, callback: impl FnMut(&Recap) + 'static) {
        self.on_report_complete = Some(Box::new(callback));
    }

    pub fn session(&self) -> &ReviewSession {
        &self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn reviewer_id(&self) -> &str {
        &self.reviewer_id
    }

    pub fn report_id(&self) -> &str {
        &self.session.report_id
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn progress(&self) -> ReportProgress {
        report_progress(self.session.sections())
    }

    /// Where the last mutation moved the session, if it completed the current
    /// part.
    pub fn last_advance(&self) -> Option<&Advance> {
        self.last_advance.as_ref()
    }

    /// Read failure that followed the last successful write. The session still
    /// shows the state from before that write until a reload succeeds.
    pub fn take_reload_error(&mut self) -> Option<ReviewError> {
        self.reload_error.take()
    }

    pub fn recap(&self) -> Recap {
        project(&self.session.report_id, &self.report_damages)
    }

    /// Re-read the report from the store and rebuild the worklist.
    pub fn reload(&mut self) -> Result<()> {
        let report_id = self.session.report_id.clone();
        let images = self.store.get_images(&report_id, None, None)?;
        let damages = self.store.get_damages(&report_id, None, None)?;
        let worklist = build_worklist(
            &self.sections,
            &images,
            &damages,
            self.session.visited_sections(),
        );

        let mut session = self.session.clone();
        session.refresh_part(&self.store)?;
        session.set_worklist(worklist);

        self.session = session;
        self.report_images = images;
        self.report_damages = damages;
        debug!(
            "Reloaded report {}: {} images, {} damages",
            report_id,
            self.report_images.len(),
            self.report_damages.len()
        );
        Ok(())
    }

    pub fn select_part(&mut self, section_id: &str, part_name: &str) -> Result<()> {
        self.session.select_part(&self.store, section_id, part_name)?;
        self.resolve_part_dimensions();
        self.rebuild_worklist();
        Ok(())
    }

    pub fn next_image(&mut self) -> bool {
        self.session.next_image()
    }

    pub fn previous_image(&mut self) -> bool {
        self.session.previous_image()
    }

    pub fn select_next_damage(&mut self) {
        self.session.select_next_damage();
    }

    pub fn select_previous_damage(&mut self) {
        self.session.select_previous_damage();
    }

    pub fn select_damage(&mut self, damage_id: &str) -> bool {
        self.session.select_damage(damage_id)
    }

    /// Next part within the current section; false at the section's end.
    pub fn next_part(&mut self) -> Result<bool> {
        match self.session.next_part_target() {
            Some((section, part)) => {
                self.select_part(&section, &part)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Step through the flattened worklist, crossing sections.
    pub fn move_in_worklist(&mut self, delta: isize) -> Result<bool> {
        match self.session.adjacent_part_target(delta) {
            Some((section, part)) => {
                self.select_part(&section, &part)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Advance the selected damage along the status cycle.
    pub fn cycle_selected_status(&mut self) -> Result<Option<Damage>> {
        let Some(id) = self.session.selected_damage_id().map(str::to_owned) else {
            return Ok(None);
        };
        let was_complete = self.current_part_complete();
        let reviewer = self.reviewer_id.clone();
        let damage = self.machine().cycle_status(&id, &reviewer)?;
        self.after_status_change(&[&damage], was_complete);
        Ok(Some(damage))
    }

    pub fn set_status(
        &mut self,
        damage_id: &str,
        status: DamageStatus,
        notes: Option<&str>,
    ) -> Result<Damage> {
        let was_complete = self.current_part_complete();
        let reviewer = self.reviewer_id.clone();
        let damage = self.machine().set_status(damage_id, status, &reviewer, notes)?;
        self.after_status_change(&[&damage], was_complete);
        Ok(damage)
    }

    pub fn set_group_status(
        &mut self,
        group_id: &str,
        status: DamageStatus,
        notes: Option<&str>,
    ) -> Result<Vec<Damage>> {
        let was_complete = self.current_part_complete();
        let reviewer = self.reviewer_id.clone();
        let damages = self
            .machine()
            .set_group_status(group_id, status, &reviewer, notes)?;
        let touched: Vec<&Damage> = damages.iter().collect();
        self.after_status_change(&touched, was_complete);
        Ok(damages)
    }

    /// Validate the pending damages of the current part, then move on.
    pub fn validate_current_part(&mut self) -> Result<Option<BulkOutcome>> {
        match self.session.current_scope() {
            Some(scope) => self.validate_part(&scope).map(Some),
            None => Ok(None),
        }
    }

    /// Dismiss every damage of the current part, then move on. The caller is
    /// responsible for confirmation.
    pub fn dismiss_current_part(&mut self) -> Result<Option<BulkOutcome>> {
        match self.session.current_scope() {
            Some(scope) => self.dismiss_part(&scope).map(Some),
            None => Ok(None),
        }
    }

    pub fn validate_part(&mut self, scope: &PartScope) -> Result<BulkOutcome> {
        let reviewer = self.reviewer_id.clone();
        let changed = self.machine().validate_part(scope, &reviewer)?.len();
        let advance = self.after_bulk(scope);
        Ok(BulkOutcome { changed, advance })
    }

    pub fn dismiss_part(&mut self, scope: &PartScope) -> Result<BulkOutcome> {
        let reviewer = self.reviewer_id.clone();
        let changed = self.machine().dismiss_part(scope, &reviewer)?.len();
        let advance = self.after_bulk(scope);
        Ok(BulkOutcome { changed, advance })
    }

    /// Store a box drawn on the current image as a new damage and select it.
    pub fn create_damage(&mut self, bounding_box: BoundingBox) -> Result<Option<Damage>> {
        let (Some(scope), Some(image)) = (
            self.session.current_scope(),
            self.session.current_image().cloned(),
        ) else {
            return Ok(None);
        };
        let draft = DamageDraft {
            report_id: scope.report_id,
            image_id: image.id,
            section_id: scope.section_id,
            part_name: scope.part_name,
            location: String::new(),
            damage_type: self.manual_damage_type.clone(),
            severity: self.manual_severity,
            bounding_box,
            damage_group_id: None,
            status: None,
            notes: String::new(),
        };
        let reviewer = self.reviewer_id.clone();
        let damage = self.machine().create_damage(draft, &reviewer)?;
        self.after_mutation();
        self.session.select_damage(&damage.id);
        Ok(Some(damage))
    }

    pub fn update_bounding_box(&mut self, damage_id: &str, bounding_box: BoundingBox) -> Result<Damage> {
        let reviewer = self.reviewer_id.clone();
        let damage = self
            .machine()
            .update_bounding_box(damage_id, bounding_box, &reviewer)?;
        self.after_mutation();
        Ok(damage)
    }

    pub fn update_details(&mut self, damage_id: &str, edit: DetailsEdit) -> Result<Damage> {
        let reviewer = self.reviewer_id.clone();
        let damage = self.machine().update_details(damage_id, edit, &reviewer)?;
        self.after_mutation();
        Ok(damage)
    }

    /// Delete a damage. Removing the last pending damage of the current part
    /// completes it like a status change would.
    pub fn delete_damage(&mut self, damage_id: &str) -> Result<()> {
        let was_complete = self.current_part_complete();
        let in_current = self.session.part_damages().iter().any(|d| d.id == damage_id);
        let reviewer = self.reviewer_id.clone();
        self.machine().delete_damage(damage_id, &reviewer)?;
        self.after_mutation();
        if in_current && !was_complete && self.reload_error.is_none() && self.current_part_complete() {
            self.advance();
        }
        Ok(())
    }

    /// Pixel size of the current image, or the fallback extent of its boxes.
    pub fn current_image_size(&self) -> Option<Size> {
        let image = self.session.current_image()?;
        Some(match image.dimensions() {
            Some((w, h)) => Size::new(w as f64, h as f64),
            None => fallback_extent(&self.session.current_image_damages()),
        })
    }

    fn machine(&mut self) -> StatusMachine<'_, S> {
        StatusMachine::new(&mut self.store).with_min_box_size(self.min_box_size)
    }

    fn rebuild_worklist(&mut self) {
        let worklist = build_worklist(
            &self.sections,
            &self.report_images,
            &self.report_damages,
            self.session.visited_sections(),
        );
        self.session.set_worklist(worklist);
    }

    fn part_complete(&self, scope: &PartScope) -> bool {
        self.session
            .sections()
            .iter()
            .filter(|s| s.section_id == scope.section_id)
            .flat_map(|s| &s.parts)
            .any(|p| p.part_name == scope.part_name && p.is_complete)
    }

    fn current_part_complete(&self) -> bool {
        self.session
            .current_scope()
            .is_some_and(|scope| self.part_complete(&scope))
    }

    /// Reload and recheck completion after a successful write. A failed read is
    /// kept, not returned, since the write itself went through.
    fn after_mutation(&mut self) {
        self.last_advance = None;
        self.reload_error = None;
        if let Err(e) = self.reload() {
            warn!("Reload after write failed: {}", e);
            self.reload_error = Some(e);
            return;
        }
        self.check_completion();
    }

    /// Reload, then advance if a changed damage sits on the current part and
    /// that part has just become complete.
    fn after_status_change(&mut self, changed: &[&Damage], was_complete: bool) {
        let touches_current = self.session.current_scope().is_some_and(|scope| {
            changed.iter().any(|d| {
                d.report_id == scope.report_id
                    && d.section_id == scope.section_id
                    && d.part_name == scope.part_name
            })
        });
        self.after_mutation();
        if touches_current
            && !was_complete
            && self.reload_error.is_none()
            && self.current_part_complete()
        {
            self.advance();
        }
    }

    /// Reload, then advance if the affected part is the current one and it is
    /// now complete.
    fn after_bulk(&mut self, scope: &PartScope) -> Option<Advance> {
        self.after_mutation();
        if self.reload_error.is_none()
            && self.session.current_scope().as_ref() == Some(scope)
            && self.part_complete(scope)
        {
            self.advance();
        }
        self.last_advance.clone()
    }

    fn advance(&mut self) {
        let mut session = self.session.clone();
        match session.advance_after_part_completion(&self.store) {
            Ok(next) => {
                self.session = session;
                if !matches!(next, Advance::ReportComplete) {
                    self.resolve_part_dimensions();
                    self.rebuild_worklist();
                }
                debug!("Part complete, advancing: {:?}", next);
                self.last_advance = Some(next);
            }
            Err(e) => {
                warn!("Failed to load next part: {}", e);
                self.reload_error = Some(e);
            }
        }
    }

    fn check_completion(&mut self) {
        let complete = is_report_complete(&self.report_damages);
        if complete && !self.complete {
            info!("Report {} is complete", self.session.report_id);
            let recap = self.recap();
            if let Some(callback) = self.on_report_complete.as_mut() {
                callback(&recap);
            }
        }
        self.complete = complete;
    }

    /// Fill in unknown image sizes of the current part from local file headers.
    ///
    /// Failures only cost accuracy: the canvas falls back to the damage extent.
    fn resolve_part_dimensions(&mut self) {
        let unknown: Vec<DamageImage> = self
            .session
            .images()
            .iter()
            .filter(|i| i.dimensions().is_none())
            .cloned()
            .collect();
        let mut resolved = false;
        for image in unknown {
            let Some((w, h)) = read_dimensions(&image.image_url) else {
                warn!(
                    "Cannot read dimensions of {}; using damage extent",
                    image.image_url
                );
                continue;
            };
            match self.store.set_image_dimensions(&image.id, w, h) {
                Ok(()) => resolved = true,
                Err(e) => warn!("Failed to record dimensions of image {}: {}", image.id, e),
            }
        }
        if resolved {
            if let Err(e) = self.session.refresh_part(&self.store) {
                warn!("Failed to reload part after resolving dimensions: {}", e);
            }
        }
    }
}

/// Read pixel dimensions from a local image file header.
pub fn read_dimensions(image_url: &str) -> Option<(u32, u32)> {
    if image_url.is_empty() || image_url.contains("://") {
        return None;
    }
    match image::image_dimensions(Path::new(image_url)) {
        Ok(dims) => Some(dims),
        Err(e) => {
            debug!("image header read failed for {}: {}", image_url, e);
            None
        }
    }
}

/// Extent covering every box, at least 640x480.
pub fn fallback_extent(damages: &[Damage]) -> Size {
    let width = damages
        .iter()
        .map(|d| d.bounding_box.right())
        .fold(FALLBACK_WIDTH, f64::max);
    let height = damages
        .iter()
        .map(|d| d.bounding_box.bottom())
        .fold(FALLBACK_HEIGHT, f64::max);
    Size::new(width, height)
}
