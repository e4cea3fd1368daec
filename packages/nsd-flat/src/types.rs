use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::NsdFlatError;

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl FromStr for Split {
    type Err = NsdFlatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            other => Err(NsdFlatError::UnknownSplit(other.to_string())),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cortical hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Lh,
    Rh,
}

impl Hemisphere {
    /// Canonical concatenation order for every mask-indexed array.
    pub const ALL: [Hemisphere; 2] = [Hemisphere::Lh, Hemisphere::Rh];

    /// FreeSurfer file prefix ("lh" / "rh")
    pub fn prefix(&self) -> &'static str {
        match self {
            Hemisphere::Lh => "lh",
            Hemisphere::Rh => "rh",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One output unit of the dataset: a stimulus, the subject's flattened response, and metadata.
///
/// The two image fields are skipped by serde; the persistence layer stores them separately.
#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    pub subject_id: usize,
    pub trial_id: usize,
    pub session_id: usize,
    pub nsd_id: u32,
    #[serde(skip)]
    pub image: RgbImage,
    #[serde(skip)]
    pub activity: GrayImage,
    pub subject: String,
    pub flagged: bool,
    #[serde(rename = "BOLD5000")]
    pub bold5000: bool,
    pub shared1000: bool,
    pub coco_split: String,
    pub coco_id: i64,
    pub objects: serde_json::Value,
    pub captions: Vec<String>,
    pub repetitions: BTreeMap<String, serde_json::Value>,
}
