use crate::types::SourceId;
use indexmap::IndexMap;
use serde::Serialize;

/// Manual price pin of one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverrideEntry {
    /// Pinned price; `None` means automatic
    pub committed: Option<f64>,
    /// Text being typed by the operator; never touched by feed updates
    pub edit_buffer: Option<String>,
}

/// Per-source manual overrides: committed values and in-progress edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideManager {
    entries: IndexMap<SourceId, OverrideEntry>,
}

impl OverrideManager {
    /// Create a manager with one (automatic) slot per overridable source.
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = SourceId>,
    {
        Self {
            entries: sources
                .into_iter()
                .map(|source| (source, OverrideEntry::default()))
                .collect(),
        }
    }

    pub fn update_edit_buffer(&mut self, source: &SourceId, text: impl Into<String>) {
        self.entry_mut(source).edit_buffer = Some(text.into());
    }

    /// Parse `text` and commit it. Empty or unparsable text returns the source to automatic.
    pub fn commit(&mut self, source: &SourceId, text: &str) -> Option<f64> {
        let value = parse_override(text);
        let entry = self.entry_mut(source);
        entry.committed = value;
        entry.edit_buffer = None;
        value
    }

    /// Commit whatever is in the edit buffer.
    pub fn commit_buffer(&mut self, source: &SourceId) -> Option<f64> {
        let text = self
            .entries
            .get(source)
            .and_then(|entry| entry.edit_buffer.clone())
            .unwrap_or_default();
        self.commit(source, &text)
    }

    pub fn clear(&mut self, source: &SourceId) {
        self.commit(source, "");
    }

    pub fn cancel_edit(&mut self, source: &SourceId) {
        if let Some(entry) = self.entries.get_mut(source) {
            entry.edit_buffer = None;
        }
    }

    /// Install a committed value known at startup without disturbing an active edit.
    pub fn seed(&mut self, source: &SourceId, value: Option<f64>) {
        self.entry_mut(source).committed = value.filter(|value| value.is_finite());
    }

    pub fn is_overridden(&self, source: &SourceId) -> bool {
        self.committed(source).is_some()
    }

    pub fn committed(&self, source: &SourceId) -> Option<f64> {
        self.entries.get(source).and_then(|entry| entry.committed)
    }

    pub fn is_editing(&self, source: &SourceId) -> bool {
        self.entries
            .get(source)
            .is_some_and(|entry| entry.edit_buffer.is_some())
    }

    pub fn entry(&self, source: &SourceId) -> Option<&OverrideEntry> {
        self.entries.get(source)
    }

    pub fn entries(&self) -> &IndexMap<SourceId, OverrideEntry> {
        &self.entries
    }

    fn entry_mut(&mut self, source: &SourceId) -> &mut OverrideEntry {
        self.entries.entry(source.clone()).or_default()
    }
}

/// Parse operator input such as `" 1,385.5 "`; anything but a finite number is `None`.
pub fn parse_override(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}
