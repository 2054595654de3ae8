//! The single record handed off at the end of a successful session.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum number of validation findings carried on a result.
pub const MAX_VALIDATION_ERRORS: usize = 6;

/// Overall reading quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    Poor,
    Fair,
    Good,
}

impl Quality {
    /// One step worse, saturating at `Poor`.
    pub const fn downgrade(self) -> Self {
        match self {
            Self::Good => Self::Fair,
            Self::Fair | Self::Poor => Self::Poor,
        }
    }
}

/// AHA blood-pressure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BpCategory {
    /// SYS < 120 and DIA < 80.
    Normal,
    /// SYS 120-129 and DIA < 80.
    Elevated,
    /// SYS 130-139 or DIA 80-89.
    Hypertension1,
    /// SYS ≥ 140 or DIA ≥ 90.
    Hypertension2,
    /// SYS > 180 and/or DIA > 120.
    HypertensiveCrisis,
}

impl BpCategory {
    pub fn classify(systolic: f64, diastolic: f64) -> Self {
        let (s, d) = (systolic.round(), diastolic.round());
        if s > 180.0 || d > 120.0 {
            Self::HypertensiveCrisis
        } else if s >= 140.0 || d >= 90.0 {
            Self::Hypertension2
        } else if s >= 130.0 || d >= 80.0 {
            Self::Hypertension1
        } else if s >= 120.0 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for BpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Elevated => write!(f, "elevated"),
            Self::Hypertension1 => write!(f, "hypertension stage 1"),
            Self::Hypertension2 => write!(f, "hypertension stage 2"),
            Self::HypertensiveCrisis => write!(f, "hypertensive crisis"),
        }
    }
}

/// SYS/DIA/MAP estimate with its quality assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub systolic: f64,
    pub diastolic: f64,
    pub map: f64,
    pub pulse_pressure: f64,
    pub heart_rate_bpm: f64,
    pub snr_db: f64,
    /// 0.0 – 1.0.
    pub confidence: f64,
    pub quality: Quality,
    pub category: BpCategory,
    /// Non-fatal findings that lowered `quality` or `confidence`.
    pub validation_errors: heapless::Vec<ValidationError, MAX_VALIDATION_ERRORS>,
}

impl MeasurementResult {
    /// Encode the hand-off record with postcard.
    pub fn to_record(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_record(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// One-line JSON rendering for console scraping.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn has_warning(&self, e: ValidationError) -> bool {
        self.validation_errors.contains(&e)
    }
}
