use damage_review::completion::{check_report_complete, is_report_complete};
use damage_review::config::ReviewConfig;
use damage_review::navigator::Advance;
use damage_review::recap::{BodyLocation, Recap};
use damage_review::store::{DamageStore, PartScope, SqliteStore};
use damage_review::workflow::ReviewWorkflow;
use damage_review::{BoundingBox, Damage, DamageImage, DamageStatus, Severity};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

fn image(id: &str, section: &str, part: &str, order: u32) -> DamageImage {
    DamageImage {
        id: id.to_string(),
        report_id: "report-1".to_string(),
        section_id: section.to_string(),
        part_name: part.to_string(),
        image_url: format!("{}.jpg", id),
        width: Some(1280),
        height: Some(960),
        order_index: order,
    }
}

fn pending(id: &str, image: &DamageImage, severity: u8) -> Damage {
    Damage {
        id: id.to_string(),
        report_id: image.report_id.clone(),
        image_id: image.id.clone(),
        damage_group_id: id.to_string(),
        section_id: image.section_id.clone(),
        part_name: image.part_name.clone(),
        location: String::new(),
        damage_type: "scratch".to_string(),
        severity: Severity::new(severity).unwrap(),
        status: DamageStatus::Pending,
        bounding_box: BoundingBox::new(100.0, 100.0, 80.0, 60.0),
        confidence_score: 0.85,
        reviewed_by: None,
        reviewed_at: None,
        notes: String::new(),
    }
}

/// Two sections, one part each, two pending damages per part.
fn seed(path: &Path) -> SqliteStore {
    let mut store = SqliteStore::open(path).unwrap();
    let bumper = image("bumper", "exterior", "Front Bumper", 0);
    let windshield = image("windshield", "glass", "Windshield", 1);
    let damages = vec![
        pending("a1", &bumper, 2),
        pending("a2", &bumper, 4),
        pending("b1", &windshield, 1),
        pending("b2", &windshield, 3),
    ];
    store.insert_batch(&[bumper, windshield], &damages).unwrap();
    store
}

fn config() -> ReviewConfig {
    ReviewConfig {
        reviewer_id: "inspector-7".to_string(),
        ..ReviewConfig::default()
    }
}

#[test]
fn validate_then_dismiss_completes_report_and_hands_off_recap() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed(&dir.path().join("review.db"));
    let mut workflow = ReviewWorkflow::open(store, "report-1", &config()).unwrap();

    let recaps: Rc<RefCell<Vec<Recap>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&recaps);
    workflow.on_report_complete(move |recap| sink.borrow_mut().push(recap.clone()));

    let outcome = workflow
        .validate_part(&PartScope::new("report-1", "exterior", "Front Bumper"))
        .unwrap();
    assert_eq!(outcome.changed, 2);
    assert_eq!(
        outcome.advance,
        Some(Advance::NextSection {
            section_id: "glass".to_string(),
            part_name: "Windshield".to_string()
        })
    );
    assert!(!workflow.is_complete());
    assert!(!check_report_complete(workflow.store(), "report-1").unwrap());
    assert!(recaps.borrow().is_empty());

    let outcome = workflow
        .dismiss_part(&PartScope::new("report-1", "glass", "Windshield"))
        .unwrap();
    assert_eq!(outcome.changed, 2);
    assert_eq!(outcome.advance, Some(Advance::ReportComplete));
    assert!(workflow.is_complete());

    let recaps = recaps.borrow();
    assert_eq!(recaps.len(), 1);
    let recap = &recaps[0];
    assert_eq!(recap.total_validated, 2);
    let front = recap.parts_at(BodyLocation::Front);
    assert_eq!(front.len(), 1);
    assert_eq!(front[0].part_name, "Front Bumper");
    assert_eq!(front[0].damage_count, 2);
    assert_eq!(front[0].max_severity.value(), 4);
    assert!(recap.parts().all(|p| p.part_name != "Windshield"));
}

#[test]
fn decisions_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("review.db");
    {
        let store = seed(&db_path);
        let mut workflow = ReviewWorkflow::open(store, "report-1", &config()).unwrap();
        workflow
            .set_status("b1", DamageStatus::NonBillable, Some("pre-existing"))
            .unwrap();
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let damage = store.get_damage("b1").unwrap();
    assert_eq!(damage.status, DamageStatus::NonBillable);
    assert_eq!(damage.notes, "pre-existing");
    assert_eq!(damage.reviewed_by.as_deref(), Some("inspector-7"));
    assert!(damage.reviewed_at.is_some());
}

#[test]
fn group_status_reaches_every_member() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seed(&dir.path().join("review.db"));
    let side = image("side", "exterior", "Front Bumper", 2);
    let mut duplicate = pending("a1-side", &side, 2);
    duplicate.damage_group_id = "a1".to_string();
    store.insert_batch(&[side], &[duplicate]).unwrap();

    let mut workflow = ReviewWorkflow::open(store, "report-1", &config()).unwrap();
    let changed = workflow
        .set_group_status("a1", DamageStatus::FalsePositive, None)
        .unwrap();
    assert_eq!(changed.len(), 2);
    assert!(changed.iter().all(|d| d.status == DamageStatus::FalsePositive));
}

#[test]
fn draw_then_delete_manual_damage() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed(&dir.path().join("review.db"));
    let mut workflow = ReviewWorkflow::open(store, "report-1", &config()).unwrap();

    let created = workflow
        .create_damage(BoundingBox::new(400.0, 300.0, 120.0, 40.0))
        .unwrap()
        .unwrap();
    assert_eq!(created.confidence_score, 1.0);
    assert_eq!(created.section_id, "exterior");
    assert_eq!(workflow.progress().total_damages, 5);

    workflow.delete_damage(&created.id).unwrap();
    assert_eq!(workflow.progress().total_damages, 4);
    assert_eq!(workflow.session().selected_damage_id(), None);
}

#[test]
fn single_updates_out_of_order_complete_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed(&dir.path().join("review.db"));
    let mut workflow = ReviewWorkflow::open(store, "report-1", &config()).unwrap();

    for id in ["b2", "a2", "b1"] {
        workflow.set_status(id, DamageStatus::Validated, None).unwrap();
    }
    assert!(!workflow.is_complete());
    workflow.set_status("a1", DamageStatus::FalsePositive, None).unwrap();
    assert!(workflow.is_complete());

    let damages = workflow.store().get_damages("report-1", None, None).unwrap();
    assert!(is_report_complete(&damages));
}
