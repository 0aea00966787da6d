use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers, MouseButton,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, Clear, List, ListItem, Paragraph, Wrap,
        canvas::{Canvas, Context as CanvasContext, Line as CanvasLine, Rectangle},
    },
};
use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::canvas::{AnnotationCanvas, CanvasEvent, CanvasMode, Stroke};
use crate::config::ReviewConfig;
use crate::coords::{Point, Size};
use crate::navigator::Advance;
use crate::navigator::keymap::{ReviewCommand, command_for_key};
use crate::recap::{BodyLocation, severity_legend};
use crate::status::DetailsEdit;
use crate::store::SqliteStore;
use crate::workflow::{BulkOutcome, ReviewWorkflow};
use crate::{BoundingBox, DamageStatus, SectionStatus, Severity};

/// Screen pixels covered by one terminal cell.
const CELL_WIDTH: f64 = 8.0;
const CELL_HEIGHT: f64 = 16.0;

/// View mode for the TUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Review,
    Recap,
}

/// Confirmation action for destructive operations.
#[derive(Debug, Clone)]
enum ConfirmAction {
    DismissPart { part_name: String, count: usize },
    DeleteDamage { damage_id: String },
}

/// Inline editor for severity and notes of one damage.
#[derive(Debug, Clone)]
struct EditForm {
    damage_id: String,
    severity: Severity,
    notes: String,
}

/// Application state for the TUI.
pub struct App {
    workflow: ReviewWorkflow<SqliteStore>,
    canvas: AnnotationCanvas,
    pub view_mode: ViewMode,
    confirm_action: Option<ConfirmAction>,
    edit_form: Option<EditForm>,
    show_help: bool,
    should_quit: bool,
    status_message: Option<(String, Instant)>,
    load_error: Option<String>,
    /// Inner area of the canvas pane at the last draw.
    canvas_area: Rect,
    /// Image and area the viewport was last fitted to.
    fitted_for: Option<(String, Rect)>,
    completed: Rc<Cell<bool>>,
}

impl App {
    /// Load the report and position on its first part.
    pub fn new(store: SqliteStore, report_id: &str, config: &ReviewConfig) -> Result<Self> {
        let mut workflow = ReviewWorkflow::open(store, report_id, config)
            .with_context(|| format!("Failed to load report {}", report_id))?;

        let completed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&completed);
        workflow.on_report_complete(move |_| flag.set(true));

        let view_mode = if workflow.is_complete() {
            ViewMode::Recap
        } else {
            ViewMode::Review
        };

        Ok(Self {
            workflow,
            canvas: AnnotationCanvas::new(config.min_box_size, config.zoom_step),
            view_mode,
            confirm_action: None,
            edit_form: None,
            show_help: false,
            should_quit: false,
            status_message: None,
            load_error: None,
            canvas_area: Rect::default(),
            fitted_for: None,
            completed,
        })
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Handle keyboard input, dispatching to the appropriate mode handler.
    fn handle_input(&mut self, key: event::KeyEvent) -> Result<()> {
        // Handle confirmation dialog first
        if let Some(action) = self.confirm_action.take() {
            if let KeyCode::Char('y') | KeyCode::Char('Y') = key.code {
                self.confirm(action);
                self.surface_reload_error();
            }
            return Ok(());
        }

        if self.show_help {
            // Any key closes help
            self.show_help = false;
            return Ok(());
        }

        if self.load_error.is_some() {
            match key.code {
                KeyCode::Char('r') => self.retry_load(),
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                _ => {}
            }
            return Ok(());
        }

        match self.view_mode {
            ViewMode::Recap => self.handle_recap_input(key),
            ViewMode::Review => {
                let editing = self.edit_form.is_some();
                match command_for_key(&key, editing) {
                    Some(command) => self.run_command(command),
                    None if editing => self.handle_edit_input(key),
                    None => {}
                }
            }
        }
        self.surface_reload_error();
        self.check_completion();
        Ok(())
    }

    fn handle_recap_input(&mut self, key: event::KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('b') => self.view_mode = ViewMode::Review,
            KeyCode::Char('?') => self.show_help = true,
            _ => {}
        }
    }

    fn handle_edit_input(&mut self, key: event::KeyEvent) {
        let Some(form) = self.edit_form.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.edit_form = None,
            KeyCode::Enter => {
                if let Some(form) = self.edit_form.take() {
                    let edit = DetailsEdit {
                        severity: Some(form.severity),
                        damage_type: None,
                        notes: Some(form.notes),
                    };
                    match self.workflow.update_details(&form.damage_id, edit) {
                        Ok(_) => self.set_status("Damage updated"),
                        Err(e) => self.set_status(format!("Update failed: {}", e)),
                    }
                }
            }
            KeyCode::Up => form.severity = form.severity.saturating_add(1),
            KeyCode::Down => form.severity = form.severity.saturating_add(-1),
            KeyCode::Backspace => {
                form.notes.pop();
            }
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER) =>
            {
                form.notes.push(c)
            }
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.view_mode != ViewMode::Review
            || self.confirm_action.is_some()
            || self.edit_form.is_some()
            || self.load_error.is_some()
        {
            return;
        }
        let inside = cell_to_screen(self.canvas_area, mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let Some(point) = inside else {
                    return;
                };
                let damages = self.workflow.session().current_image_damages();
                if let Some(CanvasEvent::DamageSelected(id)) =
                    self.canvas.on_pointer_down(point, &damages)
                {
                    self.workflow.select_damage(&id);
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let point = clamped_cell_to_screen(self.canvas_area, mouse.column, mouse.row);
                self.canvas.on_pointer_move(point);
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if let Some(CanvasEvent::DrawComplete(bbox)) = self.canvas.on_pointer_up() {
                    self.create_damage(bbox);
                }
            }
            MouseEventKind::ScrollUp if inside.is_some() => self.canvas.on_wheel(-1.0),
            MouseEventKind::ScrollDown if inside.is_some() => self.canvas.on_wheel(1.0),
            _ => {}
        }
        self.surface_reload_error();
        self.check_completion();
    }

    fn create_damage(&mut self, bbox: BoundingBox) {
        match self.workflow.create_damage(bbox) {
            Ok(Some(damage)) => self.set_status(format!(
                "Added {} damage ({:.0}x{:.0})",
                damage.damage_type, damage.bounding_box.width, damage.bounding_box.height
            )),
            Ok(None) => self.set_status("No image to annotate"),
            Err(e) => self.set_status(format!("Failed to add damage: {}", e)),
        }
    }

    fn run_command(&mut self, command: ReviewCommand) {
        match command {
            ReviewCommand::Quit => self.should_quit = true,
            ReviewCommand::ToggleHelp => self.show_help = true,
            ReviewCommand::NextDamage => self.workflow.select_next_damage(),
            ReviewCommand::PreviousDamage => self.workflow.select_previous_damage(),
            ReviewCommand::CycleStatus => match self.workflow.cycle_selected_status() {
                Ok(Some(damage)) => {
                    let next = advance_suffix(self.workflow.last_advance());
                    if self.workflow.last_advance().is_some() {
                        self.canvas.cancel_gesture();
                    }
                    self.set_status(format!("{} → {}{}", damage.damage_type, damage.status, next));
                }
                Ok(None) => self.set_status("Select a damage first (←/→ or click)"),
                Err(e) => self.set_status(format!("Status change failed: {}", e)),
            },
            ReviewCommand::NextImage => {
                if self.workflow.next_image() {
                    self.canvas.cancel_gesture();
                } else {
                    self.set_status("Last image of this part");
                }
            }
            ReviewCommand::PreviousImage => {
                if self.workflow.previous_image() {
                    self.canvas.cancel_gesture();
                } else {
                    self.set_status("First image of this part");
                }
            }
            ReviewCommand::NextPart => match self.workflow.next_part() {
                Ok(true) => self.canvas.cancel_gesture(),
                Ok(false) => self.set_status("Last part of this section"),
                Err(e) => self.load_error = Some(e.to_string()),
            },
            ReviewCommand::PreviousWorklistPart | ReviewCommand::NextWorklistPart => {
                let delta = if command == ReviewCommand::NextWorklistPart {
                    1
                } else {
                    -1
                };
                match self.workflow.move_in_worklist(delta) {
                    Ok(true) => self.canvas.cancel_gesture(),
                    Ok(false) => {}
                    Err(e) => self.load_error = Some(e.to_string()),
                }
            }
            ReviewCommand::ValidatePart => match self.workflow.validate_current_part() {
                Ok(Some(outcome)) => {
                    let message = bulk_message("Validated", &outcome);
                    self.set_status(message);
                }
                Ok(None) => {}
                Err(e) => self.set_status(format!("Validate failed: {}", e)),
            },
            ReviewCommand::DismissPart => {
                let session = self.workflow.session();
                if let Some(part_name) = session.current_part_name() {
                    self.confirm_action = Some(ConfirmAction::DismissPart {
                        part_name: part_name.to_owned(),
                        count: session.part_damages().len(),
                    });
                }
            }
            ReviewCommand::ToggleDrawMode => {
                self.canvas.toggle_draw_mode();
                let mode = match self.canvas.mode() {
                    CanvasMode::Draw => "Draw mode: drag to add a damage",
                    CanvasMode::Select => "Select mode",
                };
                self.set_status(mode);
            }
            ReviewCommand::FitToView => self.fitted_for = None,
            ReviewCommand::EditDamage => {
                if let Some(damage) = self.workflow.session().selected_damage() {
                    self.edit_form = Some(EditForm {
                        damage_id: damage.id.clone(),
                        severity: damage.severity,
                        notes: damage.notes.clone(),
                    });
                }
            }
            ReviewCommand::DeleteDamage => {
                if let Some(id) = self.workflow.session().selected_damage_id() {
                    self.confirm_action = Some(ConfirmAction::DeleteDamage {
                        damage_id: id.to_owned(),
                    });
                }
            }
        }
    }

    fn confirm(&mut self, action: ConfirmAction) {
        match action {
            ConfirmAction::DismissPart { .. } => match self.workflow.dismiss_current_part() {
                Ok(Some(outcome)) => {
                    let message = bulk_message("Dismissed", &outcome);
                    self.set_status(message);
                }
                Ok(None) => {}
                Err(e) => self.set_status(format!("Dismiss failed: {}", e)),
            },
            ConfirmAction::DeleteDamage { damage_id } => {
                match self.workflow.delete_damage(&damage_id) {
                    Ok(()) => self.set_status("Damage deleted"),
                    Err(e) => self.set_status(format!("Delete failed: {}", e)),
                }
            }
        }
        self.check_completion();
    }

    /// A write went through but the read after it failed: block on the read.
    fn surface_reload_error(&mut self) {
        if let Some(e) = self.workflow.take_reload_error() {
            self.load_error = Some(format!("Change saved, but reloading failed: {}", e));
        }
    }

    fn retry_load(&mut self) {
        match self.workflow.reload() {
            Ok(()) => {
                self.load_error = None;
                self.set_status("Reloaded");
            }
            Err(e) => self.load_error = Some(e.to_string()),
        }
    }

    /// Switch to the recap once the completion callback has fired.
    fn check_completion(&mut self) {
        if self.completed.replace(false) {
            self.canvas.cancel_gesture();
            self.view_mode = ViewMode::Recap;
        }
    }

    /// Render the UI, dispatching to the appropriate mode renderer.
    fn render(&mut self, frame: &mut Frame) {
        // Expire old status messages
        let expired = self
            .status_message
            .as_ref()
            .map(|(_, time)| time.elapsed() >= Duration::from_secs(3))
            .unwrap_or(false);
        if expired {
            self.status_message = None;
        }

        if self.show_help {
            self.render_help(frame);
            return;
        }

        if let Some(error) = &self.load_error {
            render_error(frame, error);
            return;
        }

        match self.view_mode {
            ViewMode::Review => self.render_review(frame),
            ViewMode::Recap => self.render_recap(frame),
        }

        if self.edit_form.is_some() {
            self.render_edit_form(frame);
        }

        // Draw confirmation modal on top if active
        if self.confirm_action.is_some() {
            self.render_confirm(frame);
        }
    }

    /// Render the worklist, canvas and detail panes.
    fn render_review(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)].as_ref())
            .split(frame.area());

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(
                [
                    Constraint::Percentage(25),
                    Constraint::Percentage(50),
                    Constraint::Percentage(25),
                ]
                .as_ref(),
            )
            .split(chunks[0]);

        self.render_worklist(frame, main_chunks[0]);
        self.render_canvas(frame, main_chunks[1]);
        self.render_detail(frame, main_chunks[2]);
        self.render_status_bar(frame, chunks[1]);
    }

    /// Render the section/part worklist.
    fn render_worklist(&self, frame: &mut Frame, area: Rect) {
        let session = self.workflow.session();
        let mut items = Vec::new();
        for section in session.sections() {
            let color = match section.status {
                SectionStatus::Completed => Color::Green,
                SectionStatus::InProgress => Color::Yellow,
                SectionStatus::NotStarted => Color::Gray,
            };
            let marker = if session.is_expanded(&section.section_id) {
                "▾"
            } else {
                "▸"
            };
            items.push(
                ListItem::new(format!(
                    "{} {} ({}/{})",
                    marker, section.section_name, section.reviewed_parts, section.total_parts
                ))
                .style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
            );
            if !session.is_expanded(&section.section_id) {
                continue;
            }
            for part in &section.parts {
                let is_current = session.current_section_id() == Some(section.section_id.as_str())
                    && session.current_part_name() == Some(part.part_name.as_str());
                let color = if part.is_complete {
                    Color::Green
                } else if part.reviewed_damages > 0 {
                    Color::Yellow
                } else {
                    Color::Red
                };
                let style = if is_current {
                    Style::default().fg(color).add_modifier(Modifier::REVERSED)
                } else {
                    Style::default().fg(color)
                };
                items.push(
                    ListItem::new(format!(
                        "  {} {} ({}/{})",
                        if is_current { ">" } else { " " },
                        part.part_name,
                        part.reviewed_damages,
                        part.total_damages
                    ))
                    .style(style),
                );
            }
        }

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Parts (↑/↓)"),
        );
        frame.render_widget(list, area);
    }

    /// Render the current image frame and its damage overlays.
    fn render_canvas(&mut self, frame: &mut Frame, area: Rect) {
        let session = self.workflow.session();
        let title = match session.current_image() {
            Some(image) => format!(
                "{} · image {}/{} · {:.0}%{}",
                session.current_part_name().unwrap_or_default(),
                session.current_image_index() + 1,
                session.images().len(),
                self.canvas.scale() * 100.0,
                if self.canvas.mode() == CanvasMode::Draw {
                    " · DRAW"
                } else {
                    ""
                }
            ),
            None => "No image".to_string(),
        };
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);
        self.canvas_area = inner;

        let Some(image) = session.current_image().cloned() else {
            frame.render_widget(Paragraph::new("Nothing to review").block(block), area);
            return;
        };
        let image_size = self
            .workflow
            .current_image_size()
            .unwrap_or(Size::new(640.0, 480.0));
        let container = area_size(inner);

        let fit_key = (image.id.clone(), inner);
        if self.fitted_for.as_ref() != Some(&fit_key) {
            self.canvas.fit(image_size, container);
            self.fitted_for = Some(fit_key);
        }

        let damages = self.workflow.session().current_image_damages();
        let overlays = self
            .canvas
            .overlays(&damages, self.workflow.session().selected_damage_id());
        let image_frame = self.canvas.image_frame(image_size);
        let live = self.canvas.live_overlay();
        let height = container.height;

        let widget = Canvas::default()
            .block(block)
            .marker(Marker::Braille)
            .x_bounds([0.0, container.width])
            .y_bounds([0.0, container.height])
            .paint(|ctx| {
                draw_rect(ctx, &image_frame, height, Color::DarkGray);
                ctx.print(
                    image_frame.x.max(0.0),
                    height - image_frame.bottom().min(height),
                    Span::styled(image.image_url.clone(), Style::default().fg(Color::DarkGray)),
                );
                ctx.layer();
                for overlay in &overlays {
                    draw_rect(ctx, &overlay.rect, height, overlay.color);
                    if overlay.stroke == Stroke::Thick {
                        let outer = BoundingBox::new(
                            overlay.rect.x - 4.0,
                            overlay.rect.y - 4.0,
                            overlay.rect.width + 8.0,
                            overlay.rect.height + 8.0,
                        );
                        draw_rect(ctx, &outer, height, overlay.color);
                    }
                    ctx.print(
                        overlay.rect.x,
                        height - overlay.rect.y,
                        Span::styled(
                            overlay.badge.clone(),
                            Style::default()
                                .fg(Color::Black)
                                .bg(overlay.color)
                                .add_modifier(Modifier::BOLD),
                        ),
                    );
                }
                if let Some(live) = &live {
                    draw_dashed_rect(ctx, live, height, Color::Cyan);
                }
            });
        frame.render_widget(widget, area);
    }

    /// Render the selected damage details.
    fn render_detail(&self, frame: &mut Frame, area: Rect) {
        let session = self.workflow.session();
        let mut lines = Vec::new();

        match session.selected_damage() {
            Some(damage) => {
                let label = |name: &str| Span::styled(format!("{:<11}", name), Style::default().fg(Color::Cyan));
                lines.push(Line::from(vec![label("Type"), Span::raw(damage.damage_type.clone())]));
                lines.push(Line::from(vec![
                    label("Severity"),
                    Span::styled(
                        format!("{} ({})", damage.severity, damage.severity.label()),
                        Style::default().fg(crate::canvas::severity_color(damage.severity)),
                    ),
                ]));
                lines.push(Line::from(vec![
                    label("Status"),
                    Span::styled(damage.status.to_string(), Style::default().fg(status_color(damage.status))),
                ]));
                lines.push(Line::from(vec![
                    label("Confidence"),
                    Span::raw(format!("{:.0}%", damage.confidence_score * 100.0)),
                ]));
                if !damage.location.is_empty() {
                    lines.push(Line::from(vec![label("Location"), Span::raw(damage.location.clone())]));
                }
                if let (Some(by), Some(at)) = (&damage.reviewed_by, &damage.reviewed_at) {
                    lines.push(Line::from(vec![
                        label("Reviewed"),
                        Span::raw(format!("{} {}", by, at.format("%Y-%m-%d %H:%M"))),
                    ]));
                }
                if !damage.notes.is_empty() {
                    lines.push(Line::from(""));
                    lines.push(Line::from(damage.notes.clone()));
                }
            }
            None => {
                lines.push(Line::from("No damage selected"));
                lines.push(Line::from(""));
                lines.push(Line::from("←/→ or click to select"));
            }
        }

        lines.push(Line::from(""));
        for damage in session.current_image_damages() {
            let selected = session.selected_damage_id() == Some(damage.id.as_str());
            let style = if selected {
                Style::default()
                    .fg(status_color(damage.status))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(status_color(damage.status))
            };
            lines.push(Line::from(Span::styled(
                format!(
                    "{} [{}] {} {}",
                    if selected { ">" } else { " " },
                    damage.severity,
                    damage.damage_type,
                    damage.status
                ),
                style,
            )));
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Damage"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    /// Render the status bar.
    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let status_text = match &self.status_message {
            Some((msg, _)) => msg.clone(),
            None => {
                let progress = self.workflow.progress();
                format!(
                    "{}/{} damages reviewed, {} parts remaining | Keys: ←/→=damage Space=status ^F=image ^V=part ^A=validate ^D=dismiss n=draw ?=help q=quit",
                    progress.reviewed(),
                    progress.total_damages,
                    progress.parts_remaining
                )
            }
        };

        let paragraph = Paragraph::new(status_text)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: false });

        frame.render_widget(paragraph, area);
    }

    /// Render the recap: location diagram, per-location list and legend.
    fn render_recap(&self, frame: &mut Frame) {
        let recap = self.workflow.recap();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)].as_ref())
            .split(frame.area());
        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
            .split(chunks[0]);

        // Diagram: front on top, rear at the bottom, sides left and right.
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
            ])
            .split(main_chunks[0]);
        let grid: Vec<std::rc::Rc<[Rect]>> = rows
            .iter()
            .map(|row| {
                Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([
                        Constraint::Ratio(1, 3),
                        Constraint::Ratio(1, 3),
                        Constraint::Ratio(1, 3),
                    ])
                    .split(*row)
            })
            .collect();
        let cells = [
            (grid[0][1], vec![BodyLocation::Front]),
            (grid[1][0], vec![BodyLocation::Left]),
            (grid[1][1], vec![BodyLocation::Top, BodyLocation::Center]),
            (grid[1][2], vec![BodyLocation::Right]),
            (grid[2][1], vec![BodyLocation::Rear]),
        ];
        for (cell, locations) in cells {
            let parts: Vec<_> = locations.iter().flat_map(|l| recap.parts_at(*l)).collect();
            let worst = parts.iter().map(|p| p.max_severity).max();
            let color = worst.map(crate::canvas::severity_color).unwrap_or(Color::DarkGray);
            let count: usize = parts.iter().map(|p| p.damage_count).sum();
            let title = locations
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join("/");
            let paragraph = Paragraph::new(format!("{} damage(s)", count))
                .style(Style::default().fg(color))
                .block(Block::default().borders(Borders::ALL).title(title));
            frame.render_widget(paragraph, cell);
        }

        let mut lines = Vec::new();
        if recap.is_empty() {
            lines.push(Line::from("No validated damages"));
        }
        for location in BodyLocation::ALL {
            let parts = recap.parts_at(location);
            if parts.is_empty() {
                continue;
            }
            lines.push(Line::from(Span::styled(
                location.as_str().to_uppercase(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )));
            for part in parts {
                lines.push(Line::from(vec![
                    Span::raw(format!("  {:24} {:>2} ", part.part_name, part.damage_count)),
                    Span::styled(
                        format!("max {}", part.max_severity),
                        Style::default().fg(crate::canvas::severity_color(part.max_severity)),
                    ),
                ]));
            }
        }
        lines.push(Line::from(""));
        let legend: Vec<Span> = severity_legend()
            .into_iter()
            .map(|entry| {
                Span::styled(
                    format!(" {} {} ", entry.severity, entry.label),
                    Style::default().fg(Color::Black).bg(entry.color),
                )
            })
            .collect();
        lines.push(Line::from(legend));

        let list = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Recap · {} validated", recap.total_validated)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(list, main_chunks[1]);

        let status = Paragraph::new("Review complete | b: back to review  q: quit")
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(status, chunks[1]);
    }

    /// Render the help overlay.
    fn render_help(&self, frame: &mut Frame) {
        let help_text = [
            "Damage Review - Keyboard Shortcuts",
            "",
            "Navigation:",
            "  ← / →         - Previous / next damage",
            "  Ctrl+F        - Next image",
            "  Ctrl+B        - Previous image",
            "  Ctrl+V        - Next part in section",
            "  ↑ / ↓         - Previous / next part",
            "",
            "Review:",
            "  Space         - Cycle status (validated → non-billable → false positive)",
            "  Ctrl+A        - Validate pending damages of part",
            "  Ctrl+D        - Dismiss part as false positives (confirm)",
            "  e / Enter     - Edit severity and notes",
            "  Delete        - Delete selected damage (confirm)",
            "",
            "Canvas:",
            "  n             - Toggle draw mode",
            "  0             - Fit image to view",
            "  Wheel         - Zoom",
            "  Drag          - Pan (select mode) / draw box (draw mode)",
            "",
            "Other:",
            "  ?             - Show this help",
            "  q / Esc       - Quit",
            "",
            "Press any key to close this help",
        ];

        let text = Text::from(help_text.iter().map(|&s| Line::from(s)).collect::<Vec<_>>());

        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: false });

        let area = centered_rect(60, 80, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    /// Render the edit form.
    fn render_edit_form(&self, frame: &mut Frame) {
        let Some(form) = &self.edit_form else {
            return;
        };
        let lines = vec![
            Line::from(vec![
                Span::raw("Severity: "),
                Span::styled(
                    format!("{} ({})", form.severity, form.severity.label()),
                    Style::default().fg(crate::canvas::severity_color(form.severity)),
                ),
                Span::raw("   ↑/↓ to change"),
            ]),
            Line::from(""),
            Line::from(format!("Notes: {}_", form.notes)),
            Line::from(""),
            Line::from("Enter: save  Esc: cancel"),
        ];
        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Edit damage"))
            .wrap(Wrap { trim: false });
        let area = centered_rect(50, 30, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    /// Render the confirmation modal.
    fn render_confirm(&self, frame: &mut Frame) {
        let message = match &self.confirm_action {
            Some(ConfirmAction::DismissPart { part_name, count }) => format!(
                "Mark all {} damages on {} as false positives?\nEarlier decisions on this part are overwritten.\n\n(y)es / (n)o",
                count, part_name
            ),
            Some(ConfirmAction::DeleteDamage { damage_id }) => {
                format!("Delete damage {}?\n\n(y)es / (n)o", damage_id)
            }
            None => return,
        };

        let paragraph = Paragraph::new(message)
            .block(Block::default().borders(Borders::ALL).title("Confirm"))
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Yellow));

        let area = centered_rect(50, 30, frame.area());
        // Clear the area first
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn render_error(frame: &mut Frame, error: &str) {
    let paragraph = Paragraph::new(format!(
        "Could not load review data:\n\n{}\n\nr: retry  q: quit",
        error
    ))
    .block(Block::default().borders(Borders::ALL).title("Error"))
    .wrap(Wrap { trim: false })
    .style(Style::default().fg(Color::Red));
    let area = centered_rect(60, 40, frame.area());
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn bulk_message(verb: &str, outcome: &BulkOutcome) -> String {
    format!(
        "{} {} damages{}",
        verb,
        outcome.changed,
        advance_suffix(outcome.advance.as_ref())
    )
}

fn advance_suffix(advance: Option<&Advance>) -> String {
    match advance {
        Some(Advance::NextPart { part_name, .. }) => format!(", next: {}", part_name),
        Some(Advance::NextSection { section_id, part_name }) => {
            format!(", next section: {} / {}", section_id, part_name)
        }
        Some(Advance::Unfinished { section_id, part_name }) => {
            format!(", back to unfinished {} / {}", section_id, part_name)
        }
        Some(Advance::ReportComplete) => ", report complete".to_string(),
        None => String::new(),
    }
}

fn status_color(status: DamageStatus) -> Color {
    match status {
        DamageStatus::Pending => Color::White,
        DamageStatus::Validated => Color::Green,
        DamageStatus::NonBillable => Color::Yellow,
        DamageStatus::FalsePositive => Color::DarkGray,
    }
}

/// Size of a terminal area in screen pixels.
fn area_size(area: Rect) -> Size {
    Size::new(
        area.width as f64 * CELL_WIDTH,
        area.height as f64 * CELL_HEIGHT,
    )
}

/// Screen point at the center of a cell, if the cell lies inside `area`.
fn cell_to_screen(area: Rect, column: u16, row: u16) -> Option<Point> {
    let inside = column >= area.x
        && column < area.x + area.width
        && row >= area.y
        && row < area.y + area.height;
    inside.then(|| clamped_cell_to_screen(area, column, row))
}

/// Like [`cell_to_screen`], clamping cells outside `area` to its edge.
fn clamped_cell_to_screen(area: Rect, column: u16, row: u16) -> Point {
    let col = column.saturating_sub(area.x).min(area.width.saturating_sub(1));
    let row = row.saturating_sub(area.y).min(area.height.saturating_sub(1));
    Point::new(
        (col as f64 + 0.5) * CELL_WIDTH,
        (row as f64 + 0.5) * CELL_HEIGHT,
    )
}

/// Draw a screen-space rectangle; the canvas y axis points up.
fn draw_rect(ctx: &mut CanvasContext, rect: &BoundingBox, height: f64, color: Color) {
    ctx.draw(&Rectangle {
        x: rect.x,
        y: height - rect.bottom(),
        width: rect.width,
        height: rect.height,
        color,
    });
}

fn draw_dashed_rect(ctx: &mut CanvasContext, rect: &BoundingBox, height: f64, color: Color) {
    const DASH: f64 = 12.0;
    let top = height - rect.y;
    let bottom = height - rect.bottom();
    let mut x = rect.x;
    while x < rect.right() {
        let end = (x + DASH / 2.0).min(rect.right());
        ctx.draw(&CanvasLine::new(x, top, end, top, color));
        ctx.draw(&CanvasLine::new(x, bottom, end, bottom, color));
        x += DASH;
    }
    let mut y = bottom;
    while y < top {
        let end = (y + DASH / 2.0).min(top);
        ctx.draw(&CanvasLine::new(rect.x, y, rect.x, end, color));
        ctx.draw(&CanvasLine::new(rect.right(), y, rect.right(), end, color));
        y += DASH;
    }
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Setup the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("Failed to create terminal")
}

/// Restore the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Launch the interactive review interface for one report.
pub fn run_tui(store: SqliteStore, report_id: &str, config: &ReviewConfig) -> Result<()> {
    let mut app = App::new(store, report_id, config)?;

    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;

    // Main event loop
    let result = (|| -> Result<()> {
        loop {
            terminal
                .draw(|f| app.render(f))
                .context("Failed to draw frame")?;

            if app.should_quit {
                break;
            }

            if event::poll(Duration::from_millis(200)).context("Failed to poll events")? {
                match event::read().context("Failed to read event")? {
                    // Ignore key release events
                    Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                        app.handle_input(key)?;
                    }
                    Event::Mouse(mouse) => app.handle_mouse(mouse),
                    _ => {}
                }
            }
        }
        Ok(())
    })();

    // Restore terminal in all cases
    restore_terminal(&mut terminal)?;

    result
}
