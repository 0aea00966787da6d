use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Reviewer intent bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewCommand {
    NextDamage,
    PreviousDamage,
    CycleStatus,
    NextImage,
    PreviousImage,
    NextPart,
    PreviousWorklistPart,
    NextWorklistPart,
    ValidatePart,
    /// Needs confirmation before it runs.
    DismissPart,
    ToggleDrawMode,
    FitToView,
    EditDamage,
    /// Needs confirmation before it runs.
    DeleteDamage,
    ToggleHelp,
    Quit,
}

fn is_command_modifier(modifiers: KeyModifiers) -> bool {
    modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER)
}

/// Map a key press to a command.
///
/// Returns `None` while an edit form is open, so typing in the form never
/// triggers a shortcut.
pub fn command_for_key(key: &KeyEvent, edit_form_open: bool) -> Option<ReviewCommand> {
    if edit_form_open {
        return None;
    }

    if is_command_modifier(key.modifiers) {
        return match key.code {
            KeyCode::Char('f') | KeyCode::Char('F') => Some(ReviewCommand::NextImage),
            KeyCode::Char('b') | KeyCode::Char('B') => Some(ReviewCommand::PreviousImage),
            KeyCode::Char('v') | KeyCode::Char('V') => Some(ReviewCommand::NextPart),
            KeyCode::Char('d') | KeyCode::Char('D') => Some(ReviewCommand::DismissPart),
            KeyCode::Char('a') | KeyCode::Char('A') => Some(ReviewCommand::ValidatePart),
            KeyCode::Char('c') => Some(ReviewCommand::Quit),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Right => Some(ReviewCommand::NextDamage),
        KeyCode::Left => Some(ReviewCommand::PreviousDamage),
        KeyCode::Char(' ') => Some(ReviewCommand::CycleStatus),
        KeyCode::Up => Some(ReviewCommand::PreviousWorklistPart),
        KeyCode::Down => Some(ReviewCommand::NextWorklistPart),
        KeyCode::Char('n') => Some(ReviewCommand::ToggleDrawMode),
        KeyCode::Char('0') => Some(ReviewCommand::FitToView),
        KeyCode::Char('e') | KeyCode::Enter => Some(ReviewCommand::EditDamage),
        KeyCode::Delete => Some(ReviewCommand::DeleteDamage),
        KeyCode::Char('?') => Some(ReviewCommand::ToggleHelp),
        KeyCode::Char('q') | KeyCode::Esc => Some(ReviewCommand::Quit),
        _ => None,
    }
}
