//! Dataset configuration and on-disk data layout.
//!
//! [`DatasetConfig`] carries the process-wide constants of the NSD release
//! (subject table, trial counts, raster geometry, quantization range).
//! [`DataLayout`] derives every input path from one data root.

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NsdFlatError, Result};
use crate::indexing;
use crate::resample::Bbox;
use crate::surface::HemisphereOffsets;
use crate::types::{Hemisphere, Split};

/// Subject name and number of sessions available for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub name: String,
    pub sessions: usize,
}

impl SubjectInfo {
    pub fn new(name: impl Into<String>, sessions: usize) -> Self {
        Self {
            name: name.into(),
            sessions,
        }
    }
}

/// Immutable dataset constants
///
/// The subject index used to key the trial-info table is the subject's
/// position in `subjects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub subjects: Vec<SubjectInfo>,
    /// Total trials per subject if all sessions had been acquired
    pub num_trials: usize,
    pub max_sessions: usize,
    /// Trailing sessions of each subject reserved for the test split
    pub test_sessions: usize,
    /// Raster pixel size in mm
    pub pixel_size: f64,
    /// Raster extent in mm (left, right, bottom, top)
    pub map_rect: Bbox,
    /// Quantization range is [-vmax, vmax] in standard deviations
    pub vmax: f32,
    /// Native edge length of the square stimulus images
    pub image_size: u32,
    /// Placement of each hemisphere's flat patch in the shared plane
    pub hemisphere_offsets: HemisphereOffsets,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let sessions = [40, 40, 32, 30, 40, 32, 40, 30];
        let subjects = sessions
            .iter()
            .enumerate()
            .map(|(i, &n)| SubjectInfo::new(format!("subj{:02}", i + 1), n))
            .collect();

        Self {
            subjects,
            num_trials: 30000,
            max_sessions: 40,
            test_sessions: 3,
            pixel_size: 1.0,
            map_rect: Bbox::new(-100.0, 100.0, -120.0, 95.0),
            vmax: 2.5,
            image_size: 425,
            hemisphere_offsets: HemisphereOffsets::default(),
        }
    }
}

impl DatasetConfig {
    /// Load a configuration from a JSON file. Missing fields take their default.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
        let config: DatasetConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        indexing::trials_per_session(self.num_trials, self.max_sessions)?;

        if self.subjects.is_empty() {
            return Err(NsdFlatError::Config("subject table is empty".to_string()));
        }
        for subject in &self.subjects {
            if subject.sessions > self.max_sessions {
                return Err(NsdFlatError::Config(format!(
                    "{} has {} sessions, more than max_sessions ({})",
                    subject.name, subject.sessions, self.max_sessions
                )));
            }
            if subject.sessions < self.test_sessions {
                return Err(NsdFlatError::Config(format!(
                    "{} has {} sessions, fewer than the {} test sessions",
                    subject.name, subject.sessions, self.test_sessions
                )));
            }
        }

        if !(self.pixel_size > 0.0) {
            return Err(NsdFlatError::Config(format!(
                "pixel_size must be positive, got {}",
                self.pixel_size
            )));
        }
        self.map_rect.validate()?;
        self.hemisphere_offsets.validate()?;

        if !(self.vmax > 0.0) {
            return Err(NsdFlatError::Config(format!(
                "vmax must be positive, got {}",
                self.vmax
            )));
        }
        Ok(())
    }

    pub fn trials_per_session(&self) -> usize {
        // validate() rejects configurations where this division is inexact
        self.num_trials / self.max_sessions.max(1)
    }

    /// Look up a subject by name, returning its index in the table.
    pub fn subject(&self, name: &str) -> Option<(usize, &SubjectInfo)> {
        self.subjects
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
    }

    pub fn session_range(&self, subject: &SubjectInfo, split: Split) -> Result<Range<usize>> {
        indexing::session_range(subject.sessions, self.test_sessions, split)
    }

    /// Raster grid dimensions as (width, height)
    pub fn grid_size(&self) -> (usize, usize) {
        self.map_rect.grid_size(self.pixel_size)
    }
}

/// Per-run generation options
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub split: Split,
    /// Resize stimuli to a square of this edge length
    pub img_size: Option<u32>,
    /// Stop after the first session of the first subject
    pub debug: bool,
    /// In debug mode, keep only this many trials of that session
    pub debug_trials: Option<usize>,
    /// Restrict generation to these subjects (table order is kept)
    pub subjects: Option<Vec<String>>,
}

impl GenerateOptions {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            img_size: None,
            debug: false,
            debug_trials: None,
            subjects: None,
        }
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::new(Split::Train)
    }
}

/// Paths of every input below the data root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn nsd_dir(&self) -> PathBuf {
        self.root.join("data").join("NSD")
    }

    /// ROI mask of one hemisphere in fsaverage space
    pub fn mask_path(&self, subject: &str, hemi: Hemisphere) -> PathBuf {
        self.resources_dir().join(format!(
            "{}.{}.all-vertices_fsaverage_space.npy",
            subject,
            hemi.prefix()
        ))
    }

    /// fsaverage flat patch of one hemisphere
    pub fn flat_patch_path(&self, hemi: Hemisphere) -> PathBuf {
        self.resources_dir()
            .join("fsaverage")
            .join(format!("{}.full.flat.patch.3d", hemi.prefix()))
    }

    pub fn betas_dir(&self, subject: &str) -> PathBuf {
        self.nsd_dir()
            .join("nsddata_betas")
            .join("ppdata")
            .join(subject)
            .join("fsaverage")
            .join("betas_fithrf_GLMdenoise_RR")
    }

    /// Surface betas of one session; `session` is 0-based, file names are 1-based
    pub fn session_betas_path(&self, subject: &str, hemi: Hemisphere, session: usize) -> PathBuf {
        self.betas_dir(subject).join(format!(
            "{}.betas_session{:02}.mgh",
            hemi.prefix(),
            session + 1
        ))
    }

    pub fn stimuli_dir(&self) -> PathBuf {
        self.nsd_dir()
            .join("nsddata_stimuli")
            .join("stimuli")
            .join("nsd")
    }

    /// HDF5 stimulus file as distributed with NSD (dataset `imgBrick`)
    pub fn stimuli_hdf5_path(&self) -> PathBuf {
        self.stimuli_dir().join("nsd_stimuli.hdf5")
    }

    /// Raw `N x H x W x 3` uint8 dump of the stimulus brick
    pub fn stimuli_brick_path(&self) -> PathBuf {
        self.stimuli_dir().join("nsd_stimuli.u8")
    }

    /// Alternative stimulus store: one image file per NSD id
    pub fn stimuli_image_dir(&self) -> PathBuf {
        self.stimuli_dir().join("images")
    }

    pub fn stim_info_path(&self) -> PathBuf {
        self.root.join("data").join("nsd_stim_info_long.csv")
    }

    pub fn annotations_path(&self) -> PathBuf {
        self.root.join("data").join("nsd_annotations.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DatasetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.subjects.len(), 8);
        assert_eq!(config.trials_per_session(), 750);
        assert_eq!(config.grid_size(), (200, 215));
    }

    #[test]
    fn test_subject_lookup() {
        let config = DatasetConfig::default();
        let (index, info) = config.subject("subj04").unwrap();
        assert_eq!(index, 3);
        assert_eq!(info.sessions, 30);
        assert!(config.subject("subj09").is_none());
    }

    #[test]
    fn test_session_ranges_per_subject() {
        let config = DatasetConfig::default();
        let (_, subj01) = config.subject("subj01").unwrap();
        let (_, subj03) = config.subject("subj03").unwrap();
        assert_eq!(config.session_range(subj01, Split::Train).unwrap(), 0..37);
        assert_eq!(config.session_range(subj03, Split::Test).unwrap(), 29..32);
    }

    #[test]
    fn test_validate_rejects_indivisible_trials() {
        let config = DatasetConfig {
            num_trials: 1001,
            ..DatasetConfig::default()
        };
        assert!(matches!(config.validate(), Err(NsdFlatError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_too_many_sessions() {
        let config = DatasetConfig {
            subjects: vec![SubjectInfo::new("subj01", 41)],
            ..DatasetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pixel_size() {
        let config = DatasetConfig {
            pixel_size: 0.0,
            ..DatasetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DatasetConfig =
            serde_json::from_str(r#"{"subjects": [{"name": "subj01", "sessions": 4}], "max_sessions": 4, "num_trials": 8}"#)
                .unwrap();
        config.validate().unwrap();
        assert_eq!(config.trials_per_session(), 2);
        assert_eq!(config.vmax, 2.5);
        assert_eq!(config.map_rect, Bbox::new(-100.0, 100.0, -120.0, 95.0));
    }

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.mask_path("subj01", Hemisphere::Lh),
            PathBuf::from("/data/resources/subj01.lh.all-vertices_fsaverage_space.npy")
        );
        assert_eq!(
            layout.session_betas_path("subj02", Hemisphere::Rh, 0),
            PathBuf::from(
                "/data/data/NSD/nsddata_betas/ppdata/subj02/fsaverage/betas_fithrf_GLMdenoise_RR/rh.betas_session01.mgh"
            )
        );
        assert_eq!(
            layout.stimuli_hdf5_path(),
            PathBuf::from("/data/data/NSD/nsddata_stimuli/stimuli/nsd/nsd_stimuli.hdf5")
        );
        assert_eq!(
            layout.stim_info_path(),
            PathBuf::from("/data/data/nsd_stim_info_long.csv")
        );
    }
}
