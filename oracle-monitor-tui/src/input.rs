use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use oracle_monitor::{
    DashboardFrame, SourceId, UiCommand, WeightCategory,
    params::{MAX_WEIGHT, MIN_WEIGHT},
};

/// Weight change per arrow key press.
pub const WEIGHT_STEP: f64 = 0.05;

/// What the main loop should do after a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Quit,
    Command(UiCommand),
    Nothing,
}

/// Local cursor state of the terminal UI.
#[derive(Debug, Clone, PartialEq)]
pub struct InputState {
    /// Row of the sources table
    pub selected: usize,
    pub category: WeightCategory,
    /// Override being typed, with its text as entered so far
    pub editing: Option<(SourceId, String)>,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            selected: 0,
            category: WeightCategory::Exchange,
            editing: None,
        }
    }
}

impl InputState {
    pub fn selected_source<'a>(&self, frame: &'a DashboardFrame) -> Option<&'a SourceId> {
        frame
            .view
            .sources
            .get_index(self.selected)
            .map(|(source, _)| source)
    }

    pub fn handle_key(&mut self, key: KeyEvent, frame: &DashboardFrame) -> Action {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Action::Quit;
        }

        if self.editing.is_some() {
            return self.handle_edit_key(key);
        }

        match key.code {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('r') => Action::Command(UiCommand::Refresh),
            KeyCode::Char('t') => Action::Command(UiCommand::ToggleTheme),
            KeyCode::Char('m') => Action::Command(UiCommand::SetAggregationMethod(
                frame.view.aggregation_method.toggled(),
            )),
            KeyCode::Tab | KeyCode::Down => {
                self.move_selection(frame, 1);
                Action::Nothing
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.move_selection(frame, -1);
                Action::Nothing
            }
            KeyCode::Char('c') => {
                self.category = self.category.next();
                Action::Nothing
            }
            KeyCode::Char(digit @ '1'..='4') => {
                let index = digit as usize - '1' as usize;
                self.category = WeightCategory::ALL[index];
                Action::Nothing
            }
            KeyCode::Left => self.step_weight(frame, -WEIGHT_STEP),
            KeyCode::Right => self.step_weight(frame, WEIGHT_STEP),
            KeyCode::Char('o') => self.start_edit(frame, self.selected_source(frame).cloned()),
            KeyCode::Char('u') => self.start_edit(frame, rate_slot(frame)),
            KeyCode::Char('x') => match self.selected_slot(frame) {
                Some(source) => Action::Command(UiCommand::ClearOverride { source }),
                None => Action::Nothing,
            },
            KeyCode::Char('X') => match rate_slot(frame) {
                Some(source) => Action::Command(UiCommand::ClearOverride { source }),
                None => Action::Nothing,
            },
            _ => Action::Nothing,
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) -> Action {
        let Some((source, text)) = self.editing.as_mut() else {
            return Action::Nothing;
        };

        match key.code {
            KeyCode::Char(ch) if ch.is_ascii_digit() || matches!(ch, '.' | ',' | '_') => {
                text.push(ch);
                Action::Command(UiCommand::EditOverride {
                    source: source.clone(),
                    text: text.clone(),
                })
            }
            KeyCode::Backspace => {
                text.pop();
                Action::Command(UiCommand::EditOverride {
                    source: source.clone(),
                    text: text.clone(),
                })
            }
            KeyCode::Enter => match self.editing.take() {
                Some((source, _)) => Action::Command(UiCommand::CommitOverride { source }),
                None => Action::Nothing,
            },
            KeyCode::Esc => match self.editing.take() {
                Some((source, _)) => Action::Command(UiCommand::CancelEdit { source }),
                None => Action::Nothing,
            },
            _ => Action::Nothing,
        }
    }

    fn move_selection(&mut self, frame: &DashboardFrame, delta: isize) {
        let len = frame.view.sources.len();
        if len == 0 {
            return;
        }
        self.selected = (self.selected as isize + delta).rem_euclid(len as isize) as usize;
    }

    fn step_weight(&self, frame: &DashboardFrame, delta: f64) -> Action {
        let Some((source, view)) = frame.view.sources.get_index(self.selected) else {
            return Action::Nothing;
        };
        let current = view.weights.get(&self.category).copied().unwrap_or(1.0);
        let value = ((current + delta) * 100.0).round() / 100.0;

        Action::Command(UiCommand::SetWeight {
            category: self.category,
            source: source.clone(),
            value: value.clamp(MIN_WEIGHT, MAX_WEIGHT),
        })
    }

    fn selected_slot(&self, frame: &DashboardFrame) -> Option<SourceId> {
        let source = self.selected_source(frame)?;
        has_slot(frame, source).then(|| source.clone())
    }

    fn start_edit(&mut self, frame: &DashboardFrame, source: Option<SourceId>) -> Action {
        let Some(source) = source.filter(|source| has_slot(frame, source)) else {
            return Action::Nothing;
        };
        self.editing = Some((source.clone(), String::new()));
        Action::Command(UiCommand::EditOverride {
            source,
            text: String::new(),
        })
    }
}

fn has_slot(frame: &DashboardFrame, source: &SourceId) -> bool {
    frame
        .view
        .overrides
        .iter()
        .any(|slot| &slot.source == source)
}

/// Override slot of the FX rate: the one not shown in the sources table.
fn rate_slot(frame: &DashboardFrame) -> Option<SourceId> {
    frame
        .view
        .overrides
        .iter()
        .find(|slot| !frame.view.sources.contains_key(&slot.source))
        .map(|slot| slot.source.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_monitor::{
        AggregationMethod, Dashboard, MonitorConfig, api::ApiClient, persist::MemoryStore,
        sync::SyncStatus,
    };
    use std::time::Duration;

    fn frame() -> DashboardFrame {
        let config = MonitorConfig::default();
        let api = ApiClient::new(&config.api_base, Duration::from_secs(1)).unwrap();
        Dashboard::new(config, api, Box::new(MemoryStore::default())).frame(SyncStatus::Idle)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_normal_mode_keys() {
        struct TestCase {
            input: KeyCode,
            expected: Action,
        }

        let tests = vec![
            // TC0: quit
            TestCase {
                input: KeyCode::Char('q'),
                expected: Action::Quit,
            },
            // TC1: toggle aggregation method
            TestCase {
                input: KeyCode::Char('m'),
                expected: Action::Command(UiCommand::SetAggregationMethod(AggregationMethod::Median)),
            },
            // TC2: raise the selected weight
            TestCase {
                input: KeyCode::Right,
                expected: Action::Command(UiCommand::SetWeight {
                    category: WeightCategory::Exchange,
                    source: SourceId::from("upbit"),
                    value: 1.05,
                }),
            },
            // TC3: clear the rate override
            TestCase {
                input: KeyCode::Char('X'),
                expected: Action::Command(UiCommand::ClearOverride {
                    source: SourceId::from("usdt_krw"),
                }),
            },
            // TC4: unmapped key
            TestCase {
                input: KeyCode::Char('z'),
                expected: Action::Nothing,
            },
        ];

        let frame = frame();
        for (index, test) in tests.into_iter().enumerate() {
            let mut input = InputState::default();
            let actual = input.handle_key(key(test.input), &frame);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_selection_wraps_and_weight_is_clamped() {
        let mut frame = frame();
        let mut input = InputState::default();

        input.handle_key(key(KeyCode::BackTab), &frame);
        assert_eq!(input.selected_source(&frame), Some(&SourceId::from("coinone")));

        input.handle_key(key(KeyCode::Char('3')), &frame);
        frame.view.sources[2]
            .weights
            .insert(WeightCategory::Volume, 1.98);
        assert_eq!(
            input.handle_key(key(KeyCode::Right), &frame),
            Action::Command(UiCommand::SetWeight {
                category: WeightCategory::Volume,
                source: SourceId::from("coinone"),
                value: 2.0,
            })
        );
    }

    #[test]
    fn test_override_edit_flow() {
        let frame = frame();
        let mut input = InputState::default();

        // upbit is selected and has a slot
        assert!(matches!(
            input.handle_key(key(KeyCode::Char('o')), &frame),
            Action::Command(UiCommand::EditOverride { .. })
        ));
        for ch in "5,1x00".chars() {
            input.handle_key(key(KeyCode::Char(ch)), &frame);
        }
        assert_eq!(
            input.editing,
            Some((SourceId::from("upbit"), "5,100".to_string()))
        );

        // q is ignored while typing
        assert_eq!(input.handle_key(key(KeyCode::Char('q')), &frame), Action::Nothing);

        assert_eq!(
            input.handle_key(key(KeyCode::Enter), &frame),
            Action::Command(UiCommand::CommitOverride {
                source: SourceId::from("upbit")
            })
        );
        assert_eq!(input.editing, None);
    }

    #[test]
    fn test_source_without_slot_cannot_be_edited() {
        let frame = frame();
        let mut input = InputState::default();
        input.handle_key(key(KeyCode::Tab), &frame);

        assert_eq!(input.handle_key(key(KeyCode::Char('o')), &frame), Action::Nothing);
        assert_eq!(input.editing, None);
    }
}
