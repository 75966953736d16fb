//! Gate, binding and check-in models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::Error;

/// Inferred physical entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: Uuid,
    /// Human label, auto-generated for emergent gates ("Gate 3")
    pub name: String,
    /// Sample-weighted centroid of the scans attributed to this gate
    pub location: Coordinate,
    pub event_id: String,
    /// Set when this gate was folded into another gate by an auto-merge
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gate {
    pub fn new(name: impl Into<String>, location: Coordinate, event_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location,
            event_id: event_id.into(),
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trust tier of a gate binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    Unbound,
    Probation,
    Enforced,
    /// Soft-deleted: excluded from clustering, retained for audit
    Removed,
}

impl BindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStatus::Unbound => "unbound",
            BindingStatus::Probation => "probation",
            BindingStatus::Enforced => "enforced",
            BindingStatus::Removed => "removed",
        }
    }

    /// Position on the promotion ladder; `Removed` sits outside it
    pub fn tier(&self) -> Option<u8> {
        match self {
            BindingStatus::Unbound => Some(0),
            BindingStatus::Probation => Some(1),
            BindingStatus::Enforced => Some(2),
            BindingStatus::Removed => None,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, BindingStatus::Removed)
    }
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unbound" => Ok(BindingStatus::Unbound),
            "probation" => Ok(BindingStatus::Probation),
            "enforced" => Ok(BindingStatus::Enforced),
            "removed" => Ok(BindingStatus::Removed),
            other => Err(Error::InvalidInput(format!("unknown binding status '{}'", other))),
        }
    }
}

/// Trust record attached 1:1 to a gate
///
/// `sample_count`, `confidence`, `mean_accuracy_m` and `spread_m` are recomputed from
/// the observation set every cycle. Only the reconciliation engine (or an external
/// manual override) changes `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateBinding {
    pub gate_id: Uuid,
    pub status: BindingStatus,
    pub sample_count: u32,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Mean reported accuracy radius of contributing scans (meters)
    pub mean_accuracy_m: Option<f64>,
    /// RMS distance of contributing scans from the gate centroid (meters)
    pub spread_m: f64,
    pub last_updated: DateTime<Utc>,
}

impl GateBinding {
    /// Fresh unbound binding with no evidence
    pub fn unbound(gate_id: Uuid) -> Self {
        Self {
            gate_id,
            status: BindingStatus::Unbound,
            sample_count: 0,
            confidence: 0.0,
            mean_accuracy_m: None,
            spread_m: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Confidence rounded to a whole percentage
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// A single geolocated check-in or raw scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanObservation {
    pub id: Uuid,
    pub event_id: String,
    pub location: Coordinate,
    /// Reported accuracy radius (meters), absent for some scanners
    pub accuracy_m: Option<f64>,
    pub scanned_at: DateTime<Utc>,
    /// Gate this scan is attributed to, if any
    pub gate_id: Option<Uuid>,
}

impl ScanObservation {
    pub fn new(event_id: impl Into<String>, location: Coordinate, accuracy_m: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event_id.into(),
            location,
            accuracy_m,
            scanned_at: Utc::now(),
            gate_id: None,
        }
    }

    /// Check the record against input rules (coordinate range, accuracy sign)
    pub fn validate(&self) -> crate::Result<()> {
        if !self.location.is_valid() {
            return Err(Error::InvalidInput(format!(
                "scan {} has out-of-range coordinate ({}, {})",
                self.id, self.location.latitude, self.location.longitude
            )));
        }
        if let Some(accuracy) = self.accuracy_m {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "scan {} has invalid accuracy {}",
                    self.id, accuracy
                )));
            }
        }
        Ok(())
    }
}
