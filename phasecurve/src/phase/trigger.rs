//! Trigger bindings and event lookup.
//!
//! Events are matched by exact name. Lookup order while a phase is active:
//! the phase's own bindings, then (for an externally gated phase) an event
//! named after its successor, then the global interrupts. While idle only
//! the global interrupts apply.

use indexmap::IndexMap;
use serde::Serialize;

use super::definition::{CompletionPolicy, PhaseDefinition, PhaseId};

/// Ordered event → phase bindings.
///
/// A `None` target sends the envelope back to idle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerMap {
    bindings: IndexMap<String, Option<PhaseId>>,
}

impl TriggerMap {
    /// Adds or replaces a binding.
    pub fn insert(&mut self, event: impl Into<String>, target: Option<PhaseId>) {
        self.bindings.insert(event.into(), target);
    }

    /// Looks up an event; the outer `None` means "not bound".
    #[must_use]
    pub fn get(&self, event: &str) -> Option<Option<PhaseId>> {
        self.bindings.get(event).copied()
    }

    /// Iterates bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<PhaseId>)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Which binding matched an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// The active phase's own `triggers`
    Phase,
    /// An externally gated phase released by naming its successor
    Successor,
    /// A global interrupt
    Interrupt,
}

/// A resolved trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerMatch {
    /// Phase to enter, or `None` to deactivate
    pub target: Option<PhaseId>,
    /// Binding that matched
    pub source: TriggerSource,
}

/// Resolves `event` against the bindings in effect for `current`.
///
/// Returns `None` when nothing is bound to the event.
#[must_use]
pub fn resolve<X>(
    event: &str,
    phases: &[PhaseDefinition<X>],
    current: Option<PhaseId>,
    interrupts: &TriggerMap,
) -> Option<TriggerMatch> {
    let matched = |target, source| Some(TriggerMatch { target, source });

    if let Some(phase) = current.and_then(|id| phases.get(id.index())) {
        if let Some(target) = phase.triggers().get(event) {
            return matched(target, TriggerSource::Phase);
        }
        if phase.completion() == CompletionPolicy::External {
            if let Some(next) = phase.next() {
                if phases.get(next.index()).is_some_and(|p| p.name() == event) {
                    return matched(Some(next), TriggerSource::Successor);
                }
            }
        }
    }

    interrupts
        .get(event)
        .and_then(|target| matched(target, TriggerSource::Interrupt))
}
