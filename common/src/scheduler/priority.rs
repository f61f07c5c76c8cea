// Job priority decision for incident triggers

use crate::models::Incident;
use crate::product::FlavorConfig;

/// Orchestrator default priority
pub const BASE_PRIORITY: i64 = 50;

/// Priority delta relative to the base priority
///
/// An override replaces the heuristics entirely. Otherwise: Minimal flavors
/// -5, incidents in review +10, emulated incidents always -20.
pub fn priority_delta(flavor: &FlavorConfig, incident: &Incident) -> i64 {
    if let Some(priority) = flavor.priority_override {
        return priority - BASE_PRIORITY;
    }

    let mut delta = 0;
    if flavor.name.ends_with("Minimal") {
        delta -= 5;
    }
    if !incident.staging {
        delta += 10;
    }
    if incident.emu {
        delta = -20;
    }
    delta
}

/// `_PRIORITY` value to emit, if any
pub fn priority(flavor: &FlavorConfig, incident: &Incident) -> Option<i64> {
    match priority_delta(flavor, incident) {
        0 => None,
        delta => Some(BASE_PRIORITY + delta),
    }
}
