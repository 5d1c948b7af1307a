//! Tooth records: numbering, anatomical type, whole-tooth and per-surface
//! conditions.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinicore_core::DomainError;

/// Teeth per chart (universal numbering, permanent dentition).
pub const TOOTH_COUNT: usize = 32;

/// Identifier of one tooth record within an odontogram.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToothRecordId(Uuid);

impl ToothRecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ToothRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ToothRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ToothRecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("ToothRecordId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Anatomical tooth type, derived from the universal tooth number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToothType {
    Incisor,
    Canine,
    Premolar,
    Molar,
}

impl ToothType {
    /// Universal numbering system, permanent dentition (1 = upper right
    /// third molar, 16 = upper left third molar, 17 = lower left third
    /// molar, 32 = lower right third molar).
    pub fn for_number(number: u8) -> Option<ToothType> {
        match number {
            1..=3 | 14..=19 | 30..=32 => Some(ToothType::Molar),
            4..=5 | 12..=13 | 20..=21 | 28..=29 => Some(ToothType::Premolar),
            6 | 11 | 22 | 27 => Some(ToothType::Canine),
            7..=10 | 23..=26 => Some(ToothType::Incisor),
            _ => None,
        }
    }
}

/// Whole-tooth clinical condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToothCondition {
    Healthy,
    Caries,
    Filled,
    Crowned,
    RootCanal,
    Fractured,
    Missing,
    Extracted,
}

impl ToothCondition {
    /// Terminal conditions: the tooth is gone and its chart entry is frozen.
    pub fn is_terminal(self) -> bool {
        matches!(self, ToothCondition::Missing | ToothCondition::Extracted)
    }
}

/// One of the five chartable surfaces of a tooth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToothSurface {
    Mesial,
    Distal,
    Buccal,
    Lingual,
    Occlusal,
}

/// Per-surface clinical condition.
///
/// `Healthy` clears the surface; anything else is an active finding and
/// blocks re-recording unless the caller explicitly supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceCondition {
    Healthy,
    Caries,
    Filled,
    Sealed,
    Fractured,
}

impl SurfaceCondition {
    pub fn is_active(self) -> bool {
        self != SurfaceCondition::Healthy
    }
}

/// Current state of one surface (at most one entry per surface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToothSurfaceState {
    pub surface: ToothSurface,
    pub condition: SurfaceCondition,
    pub recorded_at: DateTime<Utc>,
}

/// One tooth in the chart.
///
/// Created with the odontogram, never deleted; only condition and surfaces
/// mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToothRecord {
    pub id: ToothRecordId,
    pub tooth_number: u8,
    pub tooth_type: ToothType,
    pub condition: ToothCondition,
    pub surfaces: Vec<ToothSurfaceState>,
}

impl ToothRecord {
    pub fn healthy(id: ToothRecordId, tooth_number: u8, tooth_type: ToothType) -> Self {
        Self {
            id,
            tooth_number,
            tooth_type,
            condition: ToothCondition::Healthy,
            surfaces: Vec::new(),
        }
    }

    pub fn surface_state(&self, surface: ToothSurface) -> Option<&ToothSurfaceState> {
        self.surfaces.iter().find(|s| s.surface == surface)
    }
}
