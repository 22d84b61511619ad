//! Scenario selection state.
//!
//! Pure in-memory bookkeeping for the selection pane: which scenarios
//! are picked, per-feature tri-state summaries, and the ordered name
//! list the launch request carries. Selection belongs to the UI session
//! only and is never persisted.

use crate::model::Feature;
use std::collections::HashSet;

/// Stable identity for a scenario within the loaded catalog. Scenarios
/// without a server-side id get a key derived from their feature and
/// position, so two scenarios sharing a display name never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioKey(String);

impl ScenarioKey {
    pub fn new(feature: &Feature, ordinal: usize) -> Self {
        match feature.scenarios[ordinal].id.as_deref() {
            Some(id) if !id.is_empty() => ScenarioKey(id.to_string()),
            _ => ScenarioKey(format!("{}#{}", feature.id, ordinal)),
        }
    }
}

/// Aggregate selection status of one feature's scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    None,
    Some,
    All,
}

#[derive(Debug, Default)]
pub struct SelectionState {
    selected: HashSet<ScenarioKey>,
}

impl SelectionState {
    /// Flip one scenario. Toggling twice restores the previous state.
    pub fn toggle(&mut self, key: ScenarioKey) {
        if !self.selected.remove(&key) {
            self.selected.insert(key);
        }
    }

    pub fn is_selected(&self, key: &ScenarioKey) -> bool {
        self.selected.contains(key)
    }

    /// Select every scenario of the feature, or clear them all when
    /// every one is already selected.
    pub fn toggle_feature(&mut self, feature: &Feature) {
        let keys: Vec<ScenarioKey> = (0..feature.scenarios.len())
            .map(|ordinal| ScenarioKey::new(feature, ordinal))
            .collect();
        if !keys.is_empty() && keys.iter().all(|k| self.selected.contains(k)) {
            for key in keys {
                self.selected.remove(&key);
            }
        } else {
            for key in keys {
                self.selected.insert(key);
            }
        }
    }

    /// Selected/total counts for a feature plus the tri-state rollup.
    pub fn summary(&self, feature: &Feature) -> (usize, usize, TriState) {
        let total = feature.scenarios.len();
        let selected = (0..total)
            .filter(|&ordinal| self.selected.contains(&ScenarioKey::new(feature, ordinal)))
            .count();
        let tri = if selected == 0 {
            TriState::None
        } else if selected == total {
            TriState::All
        } else {
            TriState::Some
        };
        (selected, total, tri)
    }

    /// Selected scenario names in the feature's declared order,
    /// regardless of the order they were toggled in.
    pub fn selected_names(&self, feature: &Feature) -> Vec<String> {
        feature
            .scenarios
            .iter()
            .enumerate()
            .filter(|(ordinal, _)| self.selected.contains(&ScenarioKey::new(feature, *ordinal)))
            .map(|(_, scenario)| scenario.name.clone())
            .collect()
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }
}
