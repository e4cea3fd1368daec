//! ROI vertex masks.
//!
//! Each subject has one boolean mask per hemisphere over the fsaverage
//! vertices. Concatenated left-then-right they define the column order of
//! every activity array downstream.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};

use crate::error::{NsdFlatError, Result};
use crate::types::Hemisphere;

/// Boolean ROI selection over the vertices of one hemisphere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HemisphereMask {
    pub hemi: Hemisphere,
    pub values: Vec<bool>,
}

impl HemisphereMask {
    pub fn new(hemi: Hemisphere, values: Vec<bool>) -> Self {
        Self { hemi, values }
    }

    /// Number of vertices on the hemisphere surface
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of vertices in the ROI
    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&v| v).count()
    }

    /// Indices of the ROI vertices, ascending
    pub fn indices(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| v.then_some(i))
            .collect()
    }
}

/// Left and right masks of one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMasks {
    pub lh: HemisphereMask,
    pub rh: HemisphereMask,
}

impl SubjectMasks {
    pub fn new(lh: HemisphereMask, rh: HemisphereMask) -> Result<Self> {
        if lh.hemi != Hemisphere::Lh || rh.hemi != Hemisphere::Rh {
            return Err(NsdFlatError::Shape(format!(
                "masks given as ({}, {}), expected (lh, rh)",
                lh.hemi, rh.hemi
            )));
        }
        Ok(Self { lh, rh })
    }

    pub fn get(&self, hemi: Hemisphere) -> &HemisphereMask {
        match hemi {
            Hemisphere::Lh => &self.lh,
            Hemisphere::Rh => &self.rh,
        }
    }

    pub fn combined(&self) -> CombinedMask {
        CombinedMask::new(&self.lh, &self.rh)
    }
}

/// Left-then-right concatenation of the hemisphere masks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedMask {
    values: Vec<bool>,
    lh_len: usize,
}

impl CombinedMask {
    pub fn new(lh: &HemisphereMask, rh: &HemisphereMask) -> Self {
        let mut values = Vec::with_capacity(lh.len() + rh.len());
        values.extend_from_slice(&lh.values);
        values.extend_from_slice(&rh.values);
        Self {
            values,
            lh_len: lh.len(),
        }
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of ROI vertices over both hemispheres
    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&v| v).count()
    }

    /// The slice of the combined mask that belongs to `hemi`
    pub fn hemisphere(&self, hemi: Hemisphere) -> &[bool] {
        match hemi {
            Hemisphere::Lh => &self.values[..self.lh_len],
            Hemisphere::Rh => &self.values[self.lh_len..],
        }
    }
}

/// Source of per-subject ROI masks
pub trait MaskSource: Send + Sync {
    fn load(&self, subject: &str, hemi: Hemisphere) -> Result<HemisphereMask>;

    /// Load both hemispheres in canonical order.
    fn load_subject(&self, subject: &str) -> Result<SubjectMasks> {
        SubjectMasks::new(
            self.load(subject, Hemisphere::Lh)?,
            self.load(subject, Hemisphere::Rh)?,
        )
    }
}

/// Masks stored as `.npy` arrays; an entry is in the ROI when it is `> 0`
pub struct NpyMaskSource {
    path_for: Box<dyn Fn(&str, Hemisphere) -> PathBuf + Send + Sync>,
}

impl NpyMaskSource {
    pub fn new<F>(path_for: F) -> Self
    where
        F: Fn(&str, Hemisphere) -> PathBuf + Send + Sync + 'static,
    {
        Self {
            path_for: Box::new(path_for),
        }
    }

    /// Masks at `{dir}/{subject}.{hemi}.all-vertices_fsaverage_space.npy`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::new(move |subject, hemi| {
            dir.join(format!(
                "{}.{}.all-vertices_fsaverage_space.npy",
                subject,
                hemi.prefix()
            ))
        })
    }
}

impl MaskSource for NpyMaskSource {
    fn load(&self, subject: &str, hemi: Hemisphere) -> Result<HemisphereMask> {
        let path = (self.path_for)(subject, hemi);
        let mask = read_npy_mask(&path)?;

        let non_unit_axes = mask.shape().iter().filter(|&&d| d != 1).count();
        if non_unit_axes > 1 {
            return Err(NsdFlatError::Shape(format!(
                "mask {} has shape {:?}, expected a vector",
                path.display(),
                mask.shape()
            )));
        }

        Ok(HemisphereMask::new(hemi, mask.iter().copied().collect()))
    }
}

type MaskReader = fn(&[u8]) -> Result<Option<ArrayD<bool>>>;

/// Dtypes the ROI resources are written with, tried in order
const MASK_READERS: [MaskReader; 7] = [
    |bytes| positive::<bool>(bytes, |v| v),
    |bytes| positive::<f64>(bytes, |v| v > 0.0),
    |bytes| positive::<f32>(bytes, |v| v > 0.0),
    |bytes| positive::<i64>(bytes, |v| v > 0),
    |bytes| positive::<i32>(bytes, |v| v > 0),
    |bytes| positive::<u8>(bytes, |v| v > 0),
    |bytes| positive::<i8>(bytes, |v| v > 0),
];

/// Read an `.npy` array of any bool or numeric dtype as `value > 0`.
fn read_npy_mask(path: &Path) -> Result<ArrayD<bool>> {
    let bytes = std::fs::read(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
    for read in MASK_READERS {
        if let Some(mask) = read(&bytes)? {
            return Ok(mask);
        }
    }
    Err(NsdFlatError::Parse(format!(
        "{}: unsupported mask dtype",
        path.display()
    )))
}

/// `None` when the file holds a different dtype than `A`.
fn positive<A>(bytes: &[u8], in_roi: impl Fn(A) -> bool) -> Result<Option<ArrayD<bool>>>
where
    A: ReadableElement + Clone,
{
    match ArrayD::<A>::read_npy(bytes) {
        Ok(array) => Ok(Some(array.mapv(in_roi))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use ndarray_npy::write_npy;
    use tempfile::TempDir;

    fn masks() -> SubjectMasks {
        SubjectMasks::new(
            HemisphereMask::new(Hemisphere::Lh, vec![true, false, true]),
            HemisphereMask::new(Hemisphere::Rh, vec![false, true, true, false]),
        )
        .unwrap()
    }

    #[test]
    fn test_combined_mask_length_and_count() {
        let masks = masks();
        let combined = masks.combined();
        assert_eq!(combined.len(), masks.lh.len() + masks.rh.len());
        assert_eq!(combined.count(), masks.lh.count() + masks.rh.count());
        assert_eq!(combined.count(), 4);
    }

    #[test]
    fn test_combined_mask_is_left_then_right() {
        let combined = masks().combined();
        assert_eq!(
            combined.values(),
            &[true, false, true, false, true, true, false]
        );
        assert_eq!(combined.hemisphere(Hemisphere::Lh), &[true, false, true]);
        assert_eq!(
            combined.hemisphere(Hemisphere::Rh),
            &[false, true, true, false]
        );
    }

    #[test]
    fn test_indices() {
        assert_eq!(masks().rh.indices(), vec![1, 2]);
    }

    #[test]
    fn test_swapped_hemispheres_rejected() {
        let result = SubjectMasks::new(
            HemisphereMask::new(Hemisphere::Rh, vec![true]),
            HemisphereMask::new(Hemisphere::Lh, vec![true]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_npy_mask_source() {
        let dir = TempDir::new().unwrap();
        write_npy(
            dir.path().join("subj01.lh.all-vertices_fsaverage_space.npy"),
            &arr1(&[0.0f64, 2.0, -1.0, 0.5]),
        )
        .unwrap();
        write_npy(
            dir.path().join("subj01.rh.all-vertices_fsaverage_space.npy"),
            &arr1(&[true, false]),
        )
        .unwrap();

        let source = NpyMaskSource::in_dir(dir.path());
        let masks = source.load_subject("subj01").unwrap();
        assert_eq!(masks.lh.values, vec![false, true, false, true]);
        assert_eq!(masks.rh.values, vec![true, false]);
    }

    #[test]
    fn test_missing_mask_is_not_found() {
        let dir = TempDir::new().unwrap();
        let source = NpyMaskSource::in_dir(dir.path());
        assert!(matches!(
            source.load("subj01", Hemisphere::Lh),
            Err(NsdFlatError::NotFound(_))
        ));
    }

    #[test]
    fn test_integer_mask_dtype() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask.npy");
        write_npy(&path, &arr1(&[0i64, 3, -2, 1])).unwrap();
        assert_eq!(
            read_npy_mask(&path).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![false, true, false, true]
        );
    }

    #[test]
    fn test_column_vector_mask_accepted() {
        let dir = TempDir::new().unwrap();
        write_npy(
            dir.path().join("subj01.lh.all-vertices_fsaverage_space.npy"),
            &arr2(&[[1.0f32], [0.0], [1.0]]),
        )
        .unwrap();

        let mask = NpyMaskSource::in_dir(dir.path())
            .load("subj01", Hemisphere::Lh)
            .unwrap();
        assert_eq!(mask.values, vec![true, false, true]);
    }

    #[test]
    fn test_matrix_mask_rejected() {
        let dir = TempDir::new().unwrap();
        write_npy(
            dir.path().join("subj01.lh.all-vertices_fsaverage_space.npy"),
            &arr2(&[[1u8, 0], [0, 1]]),
        )
        .unwrap();

        assert!(matches!(
            NpyMaskSource::in_dir(dir.path()).load("subj01", Hemisphere::Lh),
            Err(NsdFlatError::Shape(_))
        ));
    }
}
