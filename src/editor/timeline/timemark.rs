use serde::{Deserialize, Serialize};

use crate::editor::utils::key_generator::key_type;

key_type!(pub struct TimeMarkKey(u32));

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeMarkSource {
    Manual,
    Auto,
}

/// A decorative marker on a track.
/// `time` is track-relative; marks ride along with ripple, delete and insert
/// shifts just like clips and envelope points do.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TimeMark {
    pub key: TimeMarkKey,
    pub time: f64,
    pub label: String,
    pub source: TimeMarkSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}
