// Narrow stored job settings to the runs that describe the current submission

use crate::models::{StoredAggregateSetting, StoredIncidentSetting};
use crate::payload::RRID;

/// Request number of an `<project>:<request>` identifier
fn rrid_request(rrid: &str) -> Option<u64> {
    rrid.rsplit_once(':')?.1.parse().ok()
}

/// Keep settings of the newest review request
///
/// Settings stored before RRID tracking existed carry no RRID and are kept.
pub fn newest_request(settings: Vec<StoredIncidentSetting>) -> Vec<StoredIncidentSetting> {
    let newest = settings
        .iter()
        .filter_map(|s| s.setting(RRID))
        .max_by_key(|rrid| (rrid_request(rrid), rrid.clone()));

    let Some(newest) = newest else {
        return settings;
    };

    settings
        .into_iter()
        .filter(|s| s.setting(RRID).map_or(true, |rrid| rrid == newest))
        .collect()
}

/// Day part of an aggregate build `<YYYYMMDD>-<n>`
fn build_day(build: &str) -> &str {
    build.split_once('-').map_or(build, |(day, _)| day)
}

/// Keep aggregate settings of the newest build day
pub fn newest_build_day(settings: Vec<StoredAggregateSetting>) -> Vec<StoredAggregateSetting> {
    let Some(newest) = settings
        .iter()
        .map(|s| build_day(&s.build).to_string())
        .max()
    else {
        return settings;
    };

    settings
        .into_iter()
        .filter(|s| build_day(&s.build) == newest)
        .collect()
}
