use std::collections::BTreeMap;
use std::fmt;

use ratatui::style::Color;
use serde::Serialize;

use crate::canvas::severity_color;
use crate::{Damage, DamageStatus, Severity};

/// Body-relative location used by the recap diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyLocation {
    Front,
    Rear,
    Left,
    Right,
    Top,
    Center,
}

impl BodyLocation {
    pub const ALL: [BodyLocation; 6] = [
        BodyLocation::Front,
        BodyLocation::Rear,
        BodyLocation::Left,
        BodyLocation::Right,
        BodyLocation::Top,
        BodyLocation::Center,
    ];

    /// Classify a part by keywords in its name. First match wins.
    pub fn classify(part_name: &str) -> BodyLocation {
        let name = part_name.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
        if has(&["front"]) {
            BodyLocation::Front
        } else if has(&["rear", "trunk", "tailgate"]) {
            BodyLocation::Rear
        } else if has(&["left", "driver"]) {
            BodyLocation::Left
        } else if has(&["right", "passenger"]) {
            BodyLocation::Right
        } else if has(&["roof", "sunroof"]) {
            BodyLocation::Top
        } else {
            BodyLocation::Center
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BodyLocation::Front => "front",
            BodyLocation::Rear => "rear",
            BodyLocation::Left => "left",
            BodyLocation::Right => "right",
            BodyLocation::Top => "top",
            BodyLocation::Center => "center",
        }
    }
}

impl fmt::Display for BodyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated damages of one part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecapPart {
    pub part_name: String,
    pub location: BodyLocation,
    pub max_severity: Severity,
    pub damage_count: usize,
    pub damages: Vec<Damage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recap {
    pub report_id: String,
    pub total_validated: usize,
    /// Parts keyed by location; parts within a location are sorted by name.
    pub locations: BTreeMap<BodyLocation, Vec<RecapPart>>,
}

impl Recap {
    /// Parts of one location, empty when nothing was validated there.
    pub fn parts_at(&self, location: BodyLocation) -> &[RecapPart] {
        self.locations
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every part, in location order.
    pub fn parts(&self) -> impl Iterator<Item = &RecapPart> {
        self.locations.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.total_validated == 0
    }
}

/// Build the recap from every damage of a report.
///
/// Only `validated` damages are counted; other statuses are left out entirely.
pub fn project(report_id: &str, damages: &[Damage]) -> Recap {
    let mut by_part: BTreeMap<&str, Vec<&Damage>> = BTreeMap::new();
    for damage in damages
        .iter()
        .filter(|d| d.status == DamageStatus::Validated)
    {
        by_part.entry(damage.part_name.as_str()).or_default().push(damage);
    }

    let mut total_validated = 0;
    let mut locations: BTreeMap<BodyLocation, Vec<RecapPart>> = BTreeMap::new();
    for (part_name, part_damages) in by_part {
        total_validated += part_damages.len();
        let max_severity = part_damages
            .iter()
            .map(|d| d.severity)
            .max()
            .unwrap_or_default();
        let location = BodyLocation::classify(part_name);
        locations.entry(location).or_default().push(RecapPart {
            part_name: part_name.to_owned(),
            location,
            max_severity,
            damage_count: part_damages.len(),
            damages: part_damages.into_iter().cloned().collect(),
        });
    }

    Recap {
        report_id: report_id.to_owned(),
        total_validated,
        locations,
    }
}

/// One row of the severity legend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegendEntry {
    pub severity: Severity,
    pub label: &'static str,
    pub color: Color,
}

/// Legend for severities 0..=5, using the canvas overlay colors.
pub fn severity_legend() -> Vec<LegendEntry> {
    Severity::all()
        .map(|severity| LegendEntry {
            severity,
            label: severity.label(),
            color: severity_color(severity),
        })
        .collect()
}
