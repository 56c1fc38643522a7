use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::error::ConfigError;

/// The output space events are projected into by the event converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFrame {
    #[default]
    #[serde(rename = "Q (lab frame)")]
    QLab,
    #[serde(rename = "Q (sample frame)")]
    QSample,
    #[serde(rename = "HKL")]
    HKL,
}

/// Tag describing the coordinate system of a finished box structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecialCoordinateSystem {
    #[default]
    None,
    QLab,
    QSample,
    HKL,
}

/// Descriptive metadata of the output dimensions. Only used for labeling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameInformation {
    pub dimension_names: Vec<String>,
    pub coordinate_system: SpecialCoordinateSystem,
    pub unit: String,
}

impl OutputFrame {
    /// Create the frame information for an `n_dims` output space.
    ///
    /// The first three dimensions take the frame's names; any further dimensions are
    /// named by index.
    pub fn create_frame(&self, n_dims: usize) -> FrameInformation {
        let (names, coordinate_system, unit) = match self {
            Self::QLab => (
                ["Q_lab_x", "Q_lab_y", "Q_lab_z"],
                SpecialCoordinateSystem::QLab,
                "Å^-1",
            ),
            Self::QSample => (
                ["Q_sample_x", "Q_sample_y", "Q_sample_z"],
                SpecialCoordinateSystem::QSample,
                "Å^-1",
            ),
            Self::HKL => (["H", "K", "L"], SpecialCoordinateSystem::HKL, "r.l.u."),
        };
        let dimension_names = (0..n_dims)
            .map(|dim| match names.get(dim) {
                Some(name) => String::from(*name),
                None => format!("dim_{dim}"),
            })
            .collect();
        FrameInformation {
            dimension_names,
            coordinate_system,
            unit: String::from(unit),
        }
    }
}

impl FromStr for OutputFrame {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Q (lab frame)" => Ok(Self::QLab),
            "Q (sample frame)" => Ok(Self::QSample),
            "HKL" => Ok(Self::HKL),
            _ => Err(ConfigError::InvalidConfiguration(format!(
                "Unknown output dimensions {s}"
            ))),
        }
    }
}

impl Display for OutputFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QLab => write!(f, "Q (lab frame)"),
            Self::QSample => write!(f, "Q (sample frame)"),
            Self::HKL => write!(f, "HKL"),
        }
    }
}
