use anyhow::{Context, Result, bail};
use log::info;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::Path;

use damage_review::cli::{self, Commands, GlobalArgs};
use damage_review::completion::{build_worklist, check_report_complete, report_progress};
use damage_review::config::ReviewConfig;
use damage_review::import::import_file;
use damage_review::recap::{BodyLocation, project, severity_legend};
use damage_review::status::StatusMachine;
use damage_review::store::{DamageStore, PartScope, SqliteStore};
use damage_review::tui::run_tui;
use damage_review::{DamageStatus, SectionStatus};

fn main() -> Result<()> {
    let args = cli::parse_args();
    let config = load_config(&args.global)?;

    let interactive = match &args.command {
        None => !args.status,
        Some(Commands::Review(review_args)) => !review_args.status,
        Some(_) => false,
    };
    init_logging(&config, interactive)?;

    match args.command {
        None => {
            // Top-level usage: damage-review [report] [--status]
            handle_review(&config, args.report, args.status)?;
        }
        Some(Commands::Review(review_args)) => {
            handle_review(&config, review_args.report, review_args.status)?;
        }
        Some(Commands::Status(report_args)) => {
            handle_review(&config, report_args.report, true)?;
        }
        Some(Commands::Check(report_args)) => {
            handle_check(&config, report_args.report)?;
        }
        Some(Commands::Import(import_args)) => {
            handle_import(&config, &import_args.file)?;
        }
        Some(Commands::ValidatePart(part)) => {
            handle_validate_part(&config, PartScope::new(part.report, part.section, part.part))?;
        }
        Some(Commands::DismissPart(dismiss)) => {
            if !dismiss.yes {
                bail!(
                    "Dismissing marks every damage of {} as a false positive. Re-run with --yes to confirm",
                    dismiss.part.part
                );
            }
            let part = dismiss.part;
            handle_dismiss_part(&config, PartScope::new(part.report, part.section, part.part))?;
        }
        Some(Commands::SetStatus(set_args)) => {
            handle_set_status(
                &config,
                &set_args.damage_id,
                &set_args.status,
                set_args.notes.as_deref(),
                set_args.group,
            )?;
        }
        Some(Commands::Recap(recap_args)) => {
            handle_recap(&config, &recap_args.report, recap_args.json)?;
        }
    }

    Ok(())
}

/// Load the config file and apply command-line overrides.
fn load_config(global: &GlobalArgs) -> Result<ReviewConfig> {
    let mut config = ReviewConfig::load(global.config.as_deref())?;
    if let Some(db) = &global.db {
        config.database_path = db.clone();
    }
    if let Some(reviewer) = &global.reviewer {
        config.reviewer_id = reviewer.clone();
    }
    Ok(config)
}

/// Log to stderr, or to a file next to the database while the TUI owns the
/// terminal. `RUST_LOG` overrides the configured level.
fn init_logging(config: &ReviewConfig, to_file: bool) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env();

    if to_file {
        let log_path = config.log_path();
        if let Some(dir) = log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialise logging")?;
    Ok(())
}

/// Open the database, creating its directory on first use.
fn open_store(config: &ReviewConfig) -> Result<SqliteStore> {
    let db_path = &config.database_path;
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    SqliteStore::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

/// Use the given report, or the only stored one.
fn resolve_report(store: &SqliteStore, report: Option<String>) -> Result<String> {
    if let Some(report) = report {
        return Ok(report);
    }
    let reports = store.list_reports()?;
    match reports.as_slice() {
        [] => bail!("No reports stored. Import detections with 'damage-review import <FILE>'"),
        [only] => Ok(only.clone()),
        _ => bail!(
            "Several reports stored ({}). Name the one to review",
            reports.join(", ")
        ),
    }
}

/// Handle the review command - either launch TUI or show status.
fn handle_review(config: &ReviewConfig, report: Option<String>, status_only: bool) -> Result<()> {
    let store = open_store(config)?;
    let report_id = resolve_report(&store, report)?;

    if store.get_damages(&report_id, None, None)?.is_empty() {
        println!("No damages to review in report {}", report_id);
        return Ok(());
    }

    if status_only {
        print_status(&store, config, &report_id)?;
    } else {
        run_tui(store, &report_id, config)?;
    }

    Ok(())
}

fn print_status(store: &SqliteStore, config: &ReviewConfig, report_id: &str) -> Result<()> {
    let images = store.get_images(report_id, None, None)?;
    let damages = store.get_damages(report_id, None, None)?;
    let sections = build_worklist(&config.sections, &images, &damages, &HashSet::new());
    let progress = report_progress(&sections);

    println!("Review Progress for {}", report_id);
    println!("─────────────────────────────────────");
    for section in &sections {
        let marker = match section.status {
            SectionStatus::Completed => "✓",
            SectionStatus::InProgress => "◐",
            SectionStatus::NotStarted => "○",
        };
        println!(
            "{} {:30} {}/{} damages, {}/{} parts",
            marker,
            section.section_name,
            section.reviewed_damages,
            section.total_damages,
            section.reviewed_parts,
            section.total_parts
        );
        for part in &section.parts {
            println!(
                "    {} {:26} {}/{}",
                if part.is_complete { "✓" } else { "○" },
                part.part_name,
                part.reviewed_damages,
                part.total_damages
            );
        }
    }
    println!();
    println!(
        "  Reviewed:       {}/{} damages ({:.0}%)",
        progress.reviewed(),
        progress.total_damages,
        progress.percent()
    );
    println!("  Validated:      {}", progress.validated);
    println!("  Non-billable:   {}", progress.non_billable);
    println!("  False positive: {}", progress.false_positive);
    println!(
        "  Parts:          {}/{} remaining",
        progress.parts_remaining, progress.total_parts
    );

    if progress.pending == 0 && progress.total_damages > 0 {
        println!("\n✓ All damages reviewed!");
    }
    Ok(())
}

/// Completion gate: exit 0 iff every damage is reviewed.
fn handle_check(config: &ReviewConfig, report: Option<String>) -> Result<()> {
    let store = open_store(config)?;
    let report_id = resolve_report(&store, report)?;

    if check_report_complete(&store, &report_id)? {
        println!("✓ Report {} fully reviewed", report_id);
        std::process::exit(0);
    } else {
        let images = store.get_images(&report_id, None, None)?;
        let damages = store.get_damages(&report_id, None, None)?;
        let progress = report_progress(&build_worklist(
            &config.sections,
            &images,
            &damages,
            &HashSet::new(),
        ));
        eprintln!("✗ Report {} not complete", report_id);
        eprintln!(
            "  {}/{} damages reviewed, {} pending",
            progress.reviewed(),
            progress.total_damages,
            progress.pending
        );
        std::process::exit(1);
    }
}

fn handle_import(config: &ReviewConfig, file: &Path) -> Result<()> {
    let mut store = open_store(config)?;
    let batch = import_file(&mut store, file, config.min_box_size)
        .with_context(|| format!("Failed to import {}", file.display()))?;
    println!(
        "✓ Imported report {}: {} images, {} damages",
        batch.report_id,
        batch.images.len(),
        batch.damages.len()
    );
    Ok(())
}

fn handle_validate_part(config: &ReviewConfig, scope: PartScope) -> Result<()> {
    let mut store = open_store(config)?;
    let changed = StatusMachine::new(&mut store)
        .with_min_box_size(config.min_box_size)
        .validate_part(&scope, &config.reviewer_id)?;
    println!(
        "✓ Validated {} pending damages on {}",
        changed.len(),
        scope.part_name
    );
    report_completion(&store, &scope.report_id)
}

fn handle_dismiss_part(config: &ReviewConfig, scope: PartScope) -> Result<()> {
    let mut store = open_store(config)?;
    let changed = StatusMachine::new(&mut store)
        .with_min_box_size(config.min_box_size)
        .dismiss_part(&scope, &config.reviewer_id)?;
    println!(
        "✓ Dismissed {} damages on {} as false positives",
        changed.len(),
        scope.part_name
    );
    report_completion(&store, &scope.report_id)
}

fn handle_set_status(
    config: &ReviewConfig,
    damage_id: &str,
    status: &str,
    notes: Option<&str>,
    group: bool,
) -> Result<()> {
    let status: DamageStatus = status.parse()?;
    let mut store = open_store(config)?;
    let damage = store.get_damage(damage_id)?;
    let mut machine = StatusMachine::new(&mut store).with_min_box_size(config.min_box_size);

    if group {
        let changed =
            machine.set_group_status(&damage.damage_group_id, status, &config.reviewer_id, notes)?;
        println!(
            "✓ Set {} damages of group {} to {}",
            changed.len(),
            damage.damage_group_id,
            status
        );
    } else {
        machine.set_status(damage_id, status, &config.reviewer_id, notes)?;
        println!("✓ Set damage {} to {}", damage_id, status);
    }
    report_completion(&store, &damage.report_id)
}

fn report_completion(store: &SqliteStore, report_id: &str) -> Result<()> {
    if check_report_complete(store, report_id)? {
        info!("Report {} complete", report_id);
        println!("✓ Report {} fully reviewed. Run 'damage-review recap {}'", report_id, report_id);
    }
    Ok(())
}

fn handle_recap(config: &ReviewConfig, report_id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let damages = store.get_damages(report_id, None, None)?;
    if damages.is_empty() {
        bail!("Report {} not found", report_id);
    }
    let recap = project(report_id, &damages);

    if json {
        let text = serde_json::to_string_pretty(&recap).context("Failed to encode recap")?;
        println!("{}", text);
        return Ok(());
    }

    println!("Recap for {}", report_id);
    println!("─────────────────────────────────────");
    if recap.is_empty() {
        println!("  No validated damages");
    }
    for location in BodyLocation::ALL {
        let parts = recap.parts_at(location);
        if parts.is_empty() {
            continue;
        }
        println!("{}", location.as_str().to_uppercase());
        for part in parts {
            println!(
                "  {:30} {} damage(s), max severity {} ({})",
                part.part_name,
                part.damage_count,
                part.max_severity,
                part.max_severity.label()
            );
        }
    }
    println!();
    let legend: Vec<String> = severity_legend()
        .iter()
        .map(|entry| format!("{}={}", entry.severity, entry.label))
        .collect();
    println!("Severity: {}", legend.join("  "));
    Ok(())
}
