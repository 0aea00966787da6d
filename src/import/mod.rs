use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;
use uuid::Uuid;

use crate::store::DamageStore;
use crate::workflow::read_dimensions;
use crate::{BoundingBox, Damage, DamageImage, DamageStatus, Result, ReviewError, Severity};

#[derive(Debug, Deserialize)]
struct DetectionFile {
    report_id: String,
    #[serde(default)]
    images: Vec<DetectedImage>,
}

#[derive(Debug, Deserialize)]
struct DetectedImage {
    id: String,
    section_id: String,
    part_name: String,
    image_url: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    order_index: Option<u32>,
    #[serde(default)]
    damages: Vec<DetectedDamage>,
}

#[derive(Debug, Deserialize)]
struct DetectedDamage {
    id: Option<String>,
    damage_group_id: Option<String>,
    damage_type: String,
    severity: Severity,
    confidence_score: f64,
    #[serde(default)]
    location: String,
    bounding_box: BoundingBox,
}

/// Validated content of a detection file, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
    pub report_id: String,
    pub images: Vec<DamageImage>,
    pub damages: Vec<Damage>,
}

/// Parse and validate a detection document.
///
/// Relative local `image_url`s are resolved against `base_dir`. Every damage
/// starts `pending`.
pub fn parse_detections(
    text: &str,
    base_dir: Option<&Path>,
    min_box_size: f64,
) -> Result<DetectionBatch> {
    let file: DetectionFile =
        serde_json::from_str(text).map_err(|e| ReviewError::Import(e.to_string()))?;
    if file.report_id.trim().is_empty() {
        return Err(ReviewError::Import("report_id is empty".to_string()));
    }

    let mut image_ids = HashSet::new();
    let mut damage_ids = HashSet::new();
    let mut images = Vec::with_capacity(file.images.len());
    let mut damages = Vec::new();

    for (position, detected) in file.images.into_iter().enumerate() {
        if !image_ids.insert(detected.id.clone()) {
            return Err(ReviewError::Import(format!(
                "duplicate image id {}",
                detected.id
            )));
        }
        let image_url = resolve_url(&detected.image_url, base_dir);
        let (width, height) = match (detected.width, detected.height) {
            (Some(w), Some(h)) => (Some(w), Some(h)),
            _ => match read_dimensions(&image_url) {
                Some((w, h)) => (Some(w), Some(h)),
                None => (None, None),
            },
        };

        for found in detected.damages {
            if !(0.0..=1.0).contains(&found.confidence_score) {
                return Err(ReviewError::Import(format!(
                    "confidence {} on image {} is outside [0, 1]",
                    found.confidence_score, detected.id
                )));
            }
            let bounding_box = found
                .bounding_box
                .validated(min_box_size)
                .map_err(|e| ReviewError::Import(format!("image {}: {}", detected.id, e)))?;
            let id = found.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            if !damage_ids.insert(id.clone()) {
                return Err(ReviewError::Import(format!("duplicate damage id {}", id)));
            }
            damages.push(Damage {
                damage_group_id: found.damage_group_id.unwrap_or_else(|| id.clone()),
                id,
                report_id: file.report_id.clone(),
                image_id: detected.id.clone(),
                section_id: detected.section_id.clone(),
                part_name: detected.part_name.clone(),
                location: found.location,
                damage_type: found.damage_type,
                severity: found.severity,
                status: DamageStatus::Pending,
                bounding_box,
                confidence_score: found.confidence_score,
                reviewed_by: None,
                reviewed_at: None,
                notes: String::new(),
            });
        }

        images.push(DamageImage {
            id: detected.id,
            report_id: file.report_id.clone(),
            section_id: detected.section_id,
            part_name: detected.part_name,
            image_url,
            width,
            height,
            order_index: detected.order_index.unwrap_or(position as u32),
        });
    }

    Ok(DetectionBatch {
        report_id: file.report_id,
        images,
        damages,
    })
}

/// Read a detection file and store its content in one batch. The whole file
/// is validated first, so a bad file leaves the store untouched.
pub fn import_file<S: DamageStore + ?Sized>(
    store: &mut S,
    path: &Path,
    min_box_size: f64,
) -> Result<DetectionBatch> {
    let text = fs::read_to_string(path)
        .map_err(|e| ReviewError::Import(format!("{}: {}", path.display(), e)))?;
    let batch = parse_detections(&text, path.parent(), min_box_size)?;
    debug!(
        "Parsed {} images and {} damages from {}",
        batch.images.len(),
        batch.damages.len(),
        path.display()
    );
    store.insert_batch(&batch.images, &batch.damages)?;
    info!(
        "Imported report {}: {} images, {} damages",
        batch.report_id,
        batch.images.len(),
        batch.damages.len()
    );
    Ok(batch)
}

fn resolve_url(url: &str, base_dir: Option<&Path>) -> String {
    if url.contains("://") || Path::new(url).is_absolute() {
        return url.to_owned();
    }
    match base_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(url).to_string_lossy().into_owned(),
        _ => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIN_BOX_SIZE;
    use crate::store::SqliteStore;

    const SAMPLE: &str = r#"{
        "report_id": "r1",
        "images": [
            { "id": "img-1", "section_id": "exterior", "part_name": "Front Bumper",
              "image_url": "https://cdn.example.com/1.jpg", "width": 1920, "height": 1080,
              "order_index": 4,
              "damages": [
                { "id": "d1", "damage_type": "scratch", "severity": 3,
                  "confidence_score": 0.91, "location": "front-left",
                  "damage_group_id": "g1",
                  "bounding_box": {"x": 10, "y": 20, "width": 100, "height": 50} },
                { "damage_type": "dent", "severity": 1, "confidence_score": 0.4,
                  "bounding_box": {"x": 300, "y": 200, "width": 40, "height": 40} }
              ] },
            { "id": "img-2", "section_id": "glass", "part_name": "Windshield",
              "image_url": "photos/2.jpg" }
        ]
    }"#;

    #[test]
    fn parses_images_and_damages() {
        let batch = parse_detections(SAMPLE, None, MIN_BOX_SIZE).unwrap();
        assert_eq!(batch.report_id, "r1");
        assert_eq!(batch.images.len(), 2);
        assert_eq!(batch.images[0].order_index, 4);
        assert_eq!(batch.images[1].order_index, 1);
        assert_eq!(batch.images[1].dimensions(), None);
        assert_eq!(batch.damages.len(), 2);
        assert!(batch.damages.iter().all(|d| d.status == DamageStatus::Pending));
        assert_eq!(batch.damages[0].damage_group_id, "g1");
        assert_eq!(batch.damages[0].section_id, "exterior");
    }

    #[test]
    fn missing_ids_get_fresh_uuids() {
        let batch = parse_detections(SAMPLE, None, MIN_BOX_SIZE).unwrap();
        let generated = &batch.damages[1];
        assert!(Uuid::parse_str(&generated.id).is_ok());
        assert_eq!(generated.damage_group_id, generated.id);
    }

    #[test]
    fn relative_urls_resolve_against_file_dir() {
        let batch = parse_detections(SAMPLE, Some(Path::new("/data/run")), MIN_BOX_SIZE).unwrap();
        assert_eq!(batch.images[0].image_url, "https://cdn.example.com/1.jpg");
        assert_eq!(batch.images[1].image_url, "/data/run/photos/2.jpg");
    }

    #[test]
    fn rejects_out_of_range_severity() {
        let text = SAMPLE.replace("\"severity\": 3", "\"severity\": 7");
        assert!(matches!(
            parse_detections(&text, None, MIN_BOX_SIZE),
            Err(ReviewError::Import(_))
        ));
    }

    #[test]
    fn rejects_confidence_outside_unit_range() {
        let text = SAMPLE.replace("0.91", "1.5");
        assert!(matches!(
            parse_detections(&text, None, MIN_BOX_SIZE),
            Err(ReviewError::Import(_))
        ));
    }

    #[test]
    fn rejects_tiny_box() {
        let text = SAMPLE.replace("\"width\": 40", "\"width\": 4");
        assert!(matches!(
            parse_detections(&text, None, MIN_BOX_SIZE),
            Err(ReviewError::Import(_))
        ));
    }

    #[test]
    fn rejects_duplicate_image_ids() {
        let text = SAMPLE.replace("\"id\": \"img-2\"", "\"id\": \"img-1\"");
        assert!(parse_detections(&text, None, MIN_BOX_SIZE).is_err());
    }

    #[test]
    fn import_writes_nothing_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, SAMPLE.replace("0.4", "-0.2")).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        assert!(import_file(&mut store, &path, MIN_BOX_SIZE).is_err());
        assert!(store.list_reports().unwrap().is_empty());
    }

    #[test]
    fn import_stores_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        fs::write(&path, SAMPLE).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        import_file(&mut store, &path, MIN_BOX_SIZE).unwrap();
        assert_eq!(store.list_reports().unwrap(), vec!["r1".to_string()]);
        assert_eq!(store.get_damages("r1", None, None).unwrap().len(), 2);
        assert_eq!(store.get_images("r1", Some("glass"), None).unwrap().len(), 1);
    }
}
