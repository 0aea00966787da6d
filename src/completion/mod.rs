use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::SectionDef;
use crate::store::DamageStore;
use crate::{
    Damage, DamageImage, DamageStatus, PartReviewInfo, Result, SectionReviewInfo, SectionStatus,
};

/// Report-wide status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportProgress {
    pub total_damages: usize,
    pub pending: usize,
    pub validated: usize,
    pub non_billable: usize,
    pub false_positive: usize,
    pub total_parts: usize,
    pub parts_remaining: usize,
}

impl ReportProgress {
    pub fn reviewed(&self) -> usize {
        self.total_damages - self.pending
    }

    pub fn percent(&self) -> f64 {
        if self.total_damages == 0 {
            0.0
        } else {
            self.reviewed() as f64 / self.total_damages as f64 * 100.0
        }
    }
}

/// Progress of one part. A part with no damages is never complete.
pub fn compute_part_info(
    section_id: &str,
    part_name: &str,
    images: Vec<DamageImage>,
    damages: Vec<Damage>,
) -> PartReviewInfo {
    let total_damages = damages.len();
    let reviewed_damages = damages.iter().filter(|d| d.status.is_reviewed()).count();
    PartReviewInfo {
        part_name: part_name.to_owned(),
        section_id: section_id.to_owned(),
        total_damages,
        reviewed_damages,
        images,
        damages,
        is_complete: total_damages > 0 && reviewed_damages == total_damages,
    }
}

/// Progress of one section from its parts.
///
/// `visited` marks a section the reviewer has opened in this session.
pub fn compute_section_info(
    section_id: &str,
    section_name: &str,
    parts: Vec<PartReviewInfo>,
    visited: bool,
) -> SectionReviewInfo {
    let total_damages = parts.iter().map(|p| p.total_damages).sum();
    let reviewed_damages = parts.iter().map(|p| p.reviewed_damages).sum();
    let reviewed_parts = parts.iter().filter(|p| p.is_complete).count();
    let is_complete = total_damages > 0 && reviewed_damages == total_damages;
    let status = if is_complete {
        SectionStatus::Completed
    } else if visited || reviewed_damages > 0 {
        SectionStatus::InProgress
    } else {
        SectionStatus::NotStarted
    };
    SectionReviewInfo {
        section_id: section_id.to_owned(),
        section_name: section_name.to_owned(),
        total_parts: parts.len(),
        reviewed_parts,
        total_damages,
        reviewed_damages,
        parts,
        status,
        is_complete,
    }
}

/// True iff there is at least one damage and none is pending.
pub fn is_report_complete(damages: &[Damage]) -> bool {
    !damages.is_empty() && damages.iter().all(|d| d.status != DamageStatus::Pending)
}

/// Completion gate read straight from the store.
pub fn check_report_complete<S: DamageStore + ?Sized>(store: &S, report_id: &str) -> Result<bool> {
    let damages = store.get_damages(report_id, None, None)?;
    Ok(is_report_complete(&damages))
}

/// Group a report into the reviewer's worklist of sections and parts.
///
/// Only parts holding damages appear. Sections follow `section_order`; ids
/// absent from it come after, alphabetically, named by their id. Parts are
/// ordered by their first image (`order_index`), then by name.
pub fn build_worklist(
    section_order: &[SectionDef],
    images: &[DamageImage],
    damages: &[Damage],
    visited: &HashSet<String>,
) -> Vec<SectionReviewInfo> {
    let mut by_part: BTreeMap<(&str, &str), Vec<Damage>> = BTreeMap::new();
    for damage in damages {
        by_part
            .entry((damage.section_id.as_str(), damage.part_name.as_str()))
            .or_default()
            .push(damage.clone());
    }

    let section_ids: BTreeSet<&str> = by_part.keys().map(|(s, _)| *s).collect();
    let mut ordered: Vec<(String, String)> = section_order
        .iter()
        .filter(|s| section_ids.contains(s.id.as_str()))
        .map(|s| (s.id.clone(), s.name.clone()))
        .collect();
    for id in &section_ids {
        if !section_order.iter().any(|s| s.id == *id) {
            ordered.push((id.to_string(), id.to_string()));
        }
    }

    ordered
        .into_iter()
        .map(|(section_id, section_name)| {
            let mut parts: Vec<(Option<u32>, PartReviewInfo)> = by_part
                .iter()
                .filter(|((s, _), _)| *s == section_id)
                .map(|((_, part), part_damages)| {
                    let part_images: Vec<DamageImage> = images
                        .iter()
                        .filter(|i| i.section_id == section_id && i.part_name == *part)
                        .cloned()
                        .collect();
                    let first = part_images.iter().map(|i| i.order_index).min();
                    (
                        first,
                        compute_part_info(&section_id, part, part_images, part_damages.clone()),
                    )
                })
                .collect();
            parts.sort_by(|(a, pa), (b, pb)| match (a, b) {
                (Some(a), Some(b)) => a.cmp(b).then_with(|| pa.part_name.cmp(&pb.part_name)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => pa.part_name.cmp(&pb.part_name),
            });
            let parts = parts.into_iter().map(|(_, p)| p).collect();
            let visited = visited.contains(&section_id);
            compute_section_info(&section_id, &section_name, parts, visited)
        })
        .collect()
}

/// Status counts over a whole report.
pub fn report_progress(sections: &[SectionReviewInfo]) -> ReportProgress {
    let mut progress = ReportProgress::default();
    for part in sections.iter().flat_map(|s| &s.parts) {
        progress.total_parts += 1;
        if !part.is_complete {
            progress.parts_remaining += 1;
        }
        for damage in &part.damages {
            progress.total_damages += 1;
            match damage.status {
                DamageStatus::Pending => progress.pending += 1,
                DamageStatus::Validated => progress.validated += 1,
                DamageStatus::NonBillable => progress.non_billable += 1,
                DamageStatus::FalsePositive => progress.false_positive += 1,
            }
        }
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Severity};

    fn damage(id: &str, section: &str, part: &str, status: DamageStatus) -> Damage {
        Damage {
            id: id.to_string(),
            report_id: "r1".to_string(),
            image_id: format!("{}-img", part),
            damage_group_id: id.to_string(),
            section_id: section.to_string(),
            part_name: part.to_string(),
            location: String::new(),
            damage_type: "scratch".to_string(),
            severity: Severity::new(1).unwrap(),
            status,
            bounding_box: BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            confidence_score: 0.5,
            reviewed_by: None,
            reviewed_at: None,
            notes: String::new(),
        }
    }

    fn image(section: &str, part: &str, order: u32) -> DamageImage {
        DamageImage {
            id: format!("{}-img", part),
            report_id: "r1".to_string(),
            section_id: section.to_string(),
            part_name: part.to_string(),
            image_url: String::new(),
            width: None,
            height: None,
            order_index: order,
        }
    }

    fn def(id: &str, name: &str) -> SectionDef {
        SectionDef {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn empty_part_is_never_complete() {
        let info = compute_part_info("s", "p", vec![], vec![]);
        assert!(!info.is_complete);
        assert_eq!(info.total_damages, 0);
    }

    #[test]
    fn part_completes_when_all_reviewed() {
        let info = compute_part_info(
            "s",
            "p",
            vec![],
            vec![
                damage("a", "s", "p", DamageStatus::Validated),
                damage("b", "s", "p", DamageStatus::Pending),
            ],
        );
        assert_eq!(info.reviewed_damages, 1);
        assert!(!info.is_complete);

        let info = compute_part_info(
            "s",
            "p",
            vec![],
            vec![
                damage("a", "s", "p", DamageStatus::Validated),
                damage("b", "s", "p", DamageStatus::FalsePositive),
            ],
        );
        assert!(info.is_complete);
    }

    #[test]
    fn report_completion_predicate() {
        assert!(!is_report_complete(&[]));
        let mut damages = vec![
            damage("a", "s", "p", DamageStatus::NonBillable),
            damage("b", "s", "q", DamageStatus::Pending),
        ];
        assert!(!is_report_complete(&damages));
        damages[1].status = DamageStatus::Validated;
        assert!(is_report_complete(&damages));
    }

    #[test]
    fn section_sums_parts() {
        let parts = vec![
            compute_part_info("s", "p", vec![], vec![damage("a", "s", "p", DamageStatus::Validated)]),
            compute_part_info(
                "s",
                "q",
                vec![],
                vec![
                    damage("b", "s", "q", DamageStatus::Pending),
                    damage("c", "s", "q", DamageStatus::Validated),
                ],
            ),
        ];
        let section = compute_section_info("s", "Exterior", parts, false);
        assert_eq!(section.total_parts, 2);
        assert_eq!(section.reviewed_parts, 1);
        assert_eq!(section.total_damages, 3);
        assert_eq!(section.reviewed_damages, 2);
        assert!(!section.is_complete);
        assert_eq!(section.status, SectionStatus::InProgress);
    }

    #[test]
    fn section_status_marker() {
        let pending = || {
            vec![compute_part_info(
                "s",
                "p",
                vec![],
                vec![damage("a", "s", "p", DamageStatus::Pending)],
            )]
        };
        assert_eq!(
            compute_section_info("s", "S", pending(), false).status,
            SectionStatus::NotStarted
        );
        assert_eq!(
            compute_section_info("s", "S", pending(), true).status,
            SectionStatus::InProgress
        );
    }

    #[test]
    fn worklist_follows_configured_section_order() {
        let damages = vec![
            damage("a", "tires", "Front Left Tire", DamageStatus::Pending),
            damage("b", "exterior", "Rear Bumper", DamageStatus::Pending),
            damage("c", "exterior", "Hood", DamageStatus::Pending),
            damage("d", "glass", "Windshield", DamageStatus::Pending),
        ];
        let images = vec![
            image("exterior", "Rear Bumper", 0),
            image("exterior", "Hood", 3),
        ];
        let order = vec![def("exterior", "Exterior"), def("tires", "Tires")];
        let sections = build_worklist(&order, &images, &damages, &HashSet::new());

        let ids: Vec<&str> = sections.iter().map(|s| s.section_id.as_str()).collect();
        assert_eq!(ids, ["exterior", "tires", "glass"]);
        assert_eq!(sections[2].section_name, "glass");

        let parts: Vec<&str> = sections[0]
            .parts
            .iter()
            .map(|p| p.part_name.as_str())
            .collect();
        assert_eq!(parts, ["Rear Bumper", "Hood"]);
        assert_eq!(sections[0].parts[0].images.len(), 1);
    }

    #[test]
    fn progress_counts_statuses() {
        let damages = vec![
            damage("a", "s", "p", DamageStatus::Validated),
            damage("b", "s", "p", DamageStatus::Pending),
            damage("c", "s", "q", DamageStatus::FalsePositive),
            damage("d", "t", "r", DamageStatus::NonBillable),
        ];
        let sections = build_worklist(&[], &[], &damages, &HashSet::new());
        let progress = report_progress(&sections);
        assert_eq!(progress.total_damages, 4);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.reviewed(), 3);
        assert_eq!(progress.total_parts, 3);
        assert_eq!(progress.parts_remaining, 1);
        assert_eq!(progress.percent(), 75.0);
    }
}
