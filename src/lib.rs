pub mod canvas;
pub mod cli;
pub mod completion;
pub mod config;
pub mod coords;
pub mod import;
pub mod navigator;
pub mod recap;
pub mod status;
pub mod store;
pub mod tui;
pub mod workflow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::coords::Point;

/// Smallest width and height, in image pixels, of a box the system accepts.
pub const MIN_BOX_SIZE: f64 = 10.0;

/// Errors raised by the review engine.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid damage status: {0}")]
    InvalidStatus(String),
    #[error("invalid severity: {0} (expected 0-5)")]
    InvalidSeverity(u8),
    #[error("bounding box {width}x{height} is below the minimum size of {min}px")]
    InvalidBoundingBox { width: f64, height: f64, min: f64 },
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),
    #[error("import failed: {0}")]
    Import(String),
}

impl ReviewError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ReviewError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Review status of a single damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageStatus {
    Pending,
    Validated,
    NonBillable,
    FalsePositive,
}

impl DamageStatus {
    pub const ALL: [DamageStatus; 4] = [
        DamageStatus::Pending,
        DamageStatus::Validated,
        DamageStatus::NonBillable,
        DamageStatus::FalsePositive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DamageStatus::Pending => "pending",
            DamageStatus::Validated => "validated",
            DamageStatus::NonBillable => "non_billable",
            DamageStatus::FalsePositive => "false_positive",
        }
    }

    /// Whether a reviewer has classified this damage.
    pub fn is_reviewed(self) -> bool {
        self != DamageStatus::Pending
    }

    /// Next status in the keyboard cycle.
    ///
    /// `validated -> non_billable -> false_positive -> validated`; a pending
    /// damage enters the cycle at `validated`.
    pub fn cycled(self) -> DamageStatus {
        match self {
            DamageStatus::Pending => DamageStatus::Validated,
            DamageStatus::Validated => DamageStatus::NonBillable,
            DamageStatus::NonBillable => DamageStatus::FalsePositive,
            DamageStatus::FalsePositive => DamageStatus::Validated,
        }
    }
}

impl fmt::Display for DamageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DamageStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DamageStatus::Pending),
            "validated" => Ok(DamageStatus::Validated),
            "non_billable" => Ok(DamageStatus::NonBillable),
            "false_positive" => Ok(DamageStatus::FalsePositive),
            other => Err(ReviewError::InvalidStatus(other.to_owned())),
        }
    }
}

/// Damage severity, 0 (none) to 5 (severe).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MAX: u8 = 5;
    pub const MODERATE: Severity = Severity(3);

    pub fn new(value: u8) -> Result<Self> {
        if value <= Self::MAX {
            Ok(Severity(value))
        } else {
            Err(ReviewError::InvalidSeverity(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// All severities from none to severe.
    pub fn all() -> impl Iterator<Item = Severity> {
        (0..=Self::MAX).map(Severity)
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "none",
            1 => "minor",
            2 => "light",
            3 => "moderate",
            4 => "major",
            _ => "severe",
        }
    }

    pub fn saturating_add(self, delta: i8) -> Severity {
        let value = (self.0 as i16 + delta as i16).clamp(0, Self::MAX as i16);
        Severity(value as u8)
    }
}

impl TryFrom<u8> for Severity {
    type Error = ReviewError;

    fn try_from(value: u8) -> Result<Self> {
        Severity::new(value)
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> u8 {
        severity.0
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned rectangle in image-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Normalized box spanning two corner points, whatever the drag direction.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn meets_minimum(&self, min_size: f64) -> bool {
        self.width >= min_size && self.height >= min_size
    }

    /// Return the box if both sides reach `min_size`.
    pub fn validated(self, min_size: f64) -> Result<Self> {
        if self.meets_minimum(min_size) {
            Ok(self)
        } else {
            Err(ReviewError::InvalidBoundingBox {
                width: self.width,
                height: self.height,
                min: min_size,
            })
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }
}

/// One photograph of the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageImage {
    pub id: String,
    pub report_id: String,
    pub section_id: String,
    pub part_name: String,
    pub image_url: String,
    /// Native pixel size, when known.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub order_index: u32,
}

impl DamageImage {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// A detected or manually drawn defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Damage {
    pub id: String,
    pub report_id: String,
    pub image_id: String,
    pub damage_group_id: String,
    pub section_id: String,
    pub part_name: String,
    pub location: String,
    pub damage_type: String,
    pub severity: Severity,
    pub status: DamageStatus,
    pub bounding_box: BoundingBox,
    pub confidence_score: f64,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: String,
}

/// Derived review progress for one part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartReviewInfo {
    pub part_name: String,
    pub section_id: String,
    pub total_damages: usize,
    pub reviewed_damages: usize,
    pub images: Vec<DamageImage>,
    pub damages: Vec<Damage>,
    pub is_complete: bool,
}

/// Coarse per-section marker, independent of the per-damage counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Derived review progress for one section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionReviewInfo {
    pub section_id: String,
    pub section_name: String,
    pub parts: Vec<PartReviewInfo>,
    pub total_parts: usize,
    pub reviewed_parts: usize,
    pub total_damages: usize,
    pub reviewed_damages: usize,
    pub status: SectionStatus,
    pub is_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_known_values() {
        for status in DamageStatus::ALL {
            assert_eq!(status.as_str().parse::<DamageStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_rejects_unknown_value() {
        let err = "approved".parse::<DamageStatus>().unwrap_err();
        assert!(matches!(err, ReviewError::InvalidStatus(s) if s == "approved"));
    }

    #[test]
    fn status_cycle_loops_over_reviewed_states() {
        assert_eq!(DamageStatus::Validated.cycled(), DamageStatus::NonBillable);
        assert_eq!(DamageStatus::NonBillable.cycled(), DamageStatus::FalsePositive);
        assert_eq!(DamageStatus::FalsePositive.cycled(), DamageStatus::Validated);
        assert_eq!(DamageStatus::Pending.cycled(), DamageStatus::Validated);
    }

    #[test]
    fn severity_bounds() {
        assert!(Severity::new(5).is_ok());
        assert!(matches!(Severity::new(6), Err(ReviewError::InvalidSeverity(6))));
        assert_eq!(Severity::new(4).unwrap().saturating_add(3).value(), 5);
        assert_eq!(Severity::new(1).unwrap().saturating_add(-3).value(), 0);
    }

    #[test]
    fn severity_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Severity>("3").is_ok());
        assert!(serde_json::from_str::<Severity>("9").is_err());
    }

    #[test]
    fn box_from_corners_is_direction_independent() {
        let a = Point::new(40.0, 60.0);
        let b = Point::new(10.0, 20.0);
        assert_eq!(BoundingBox::from_corners(a, b), BoundingBox::from_corners(b, a));
        assert_eq!(
            BoundingBox::from_corners(a, b),
            BoundingBox::new(10.0, 20.0, 30.0, 40.0)
        );
    }

    #[test]
    fn box_validation_uses_minimum_size() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).validated(10.0).is_ok());
        let err = BoundingBox::new(0.0, 0.0, 9.5, 30.0)
            .validated(10.0)
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidBoundingBox { .. }));
    }
}
