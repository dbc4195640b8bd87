//! Roster diffing
//!
//! Pure helpers the manager uses to compare a poll result with its roster.

use std::collections::BTreeSet;

use crate::model::Model;

/// Outcome of comparing the current roster with an incoming one
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterDiff {
    /// Incoming differs from current in any element, the count, or the order
    pub changed: bool,
    /// Models whose name is absent from the incoming roster
    pub departed: Vec<Model>,
    /// Models whose name is absent from the current roster
    pub arrived: Vec<Model>,
}

pub fn diff(current: &[Model], incoming: &[Model]) -> RosterDiff {
    if current == incoming {
        return RosterDiff::default();
    }

    let incoming_names: BTreeSet<&str> = incoming.iter().map(|m| m.name.as_str()).collect();
    let current_names: BTreeSet<&str> = current.iter().map(|m| m.name.as_str()).collect();

    RosterDiff {
        changed: true,
        departed: current
            .iter()
            .filter(|m| !incoming_names.contains(m.name.as_str()))
            .cloned()
            .collect(),
        arrived: incoming
            .iter()
            .filter(|m| !current_names.contains(m.name.as_str()))
            .cloned()
            .collect(),
    }
}

/// Drop later entries that repeat an earlier name, preserving order
pub fn dedupe_by_name(models: Vec<Model>) -> Vec<Model> {
    let mut seen = BTreeSet::new();
    models
        .into_iter()
        .filter(|m| seen.insert(m.name.clone()))
        .collect()
}
