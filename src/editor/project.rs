//! Versioned project files.
//!
//! A project stores track layout and mix settings as JSON; audio stays in the
//! source files, referenced relative to the project's directory where
//! possible. Tracks without a source get their mixed audio cached to a WAV
//! next to the project and are reloaded from there.

use std::{
    error::Error,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timeline::{TimeMark, TrackKey, VolumePoint};

pub const PROJECT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProjectFile {
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub tracks: Vec<ProjectTrack>,
    pub selection: ProjectSelection,
    #[serde(default)]
    pub silence_regions: Vec<(f64, f64)>,
    #[serde(default)]
    pub silence_compression: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProjectTrack {
    pub id: TrackKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_audio_path: Option<PathBuf>,
    pub track_start: f64,
    pub duration: f64,
    pub color: String,
    pub muted: bool,
    pub solo: bool,
    pub volume: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timemarks: Vec<TimeMark>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_envelope: Vec<VolumePoint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProjectSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_point: Option<f64>,
}

impl ProjectFile {
    pub fn save(&self, path: &Path) -> Result<(), ProjectError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let json = fs::read_to_string(path)?;
        let project: ProjectFile = serde_json::from_str(&json)?;
        if project.version != PROJECT_VERSION {
            return Err(ProjectError::UnsupportedVersion(project.version));
        }
        Ok(project)
    }
}

/// Store `path` relative to `base` when it lives under it.
pub fn relativize(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

/// Resolve a stored path against the project's directory.
pub fn resolve(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug)]
pub enum ProjectError {
    Io(std::io::Error),
    Json(serde_json::Error),
    UnsupportedVersion(u32),
}
impl Display for ProjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Project file could not be accessed: {e}"),
            Self::Json(e) => write!(f, "Project file is not valid JSON: {e}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "Project file version {version} is not supported")
            }
        }
    }
}
impl Error for ProjectError {}
impl From<std::io::Error> for ProjectError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<serde_json::Error> for ProjectError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
