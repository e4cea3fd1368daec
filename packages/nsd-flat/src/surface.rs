//! Flattened cortical surface geometry.
//!
//! The reference surface is fsaverage cut and flattened per hemisphere.
//! FreeSurfer stores the flattening as a binary patch file listing the
//! vertices kept in the patch with their planar coordinates. Vertices cut out
//! of the patch have no flat coordinate.

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{NsdFlatError, Result};
use crate::mask::CombinedMask;
use crate::types::Hemisphere;

/// Magic number opening the current FreeSurfer patch format
pub const PATCH_MAGIC: i32 = -1;

/// Source of flat coordinates for the ROI vertices
pub trait FlatSurfaceProvider: Send + Sync {
    /// 2D coordinates of every `true` entry of `mask`, in mask order.
    fn extract_patch(&self, mask: &CombinedMask) -> Result<Vec<Point2<f64>>>;
}

/// One hemisphere of a FreeSurfer flat patch
#[derive(Debug, Clone, PartialEq)]
pub struct FlatPatch {
    /// Flat coordinate per surface vertex, `None` where the vertex was cut
    pub coords: Vec<Option<Point2<f64>>>,
}

impl FlatPatch {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
        Self::from_reader(&mut Cursor::new(bytes)).map_err(|e| match e {
            NsdFlatError::Parse(msg) => {
                NsdFlatError::Parse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Read a binary patch: magic, point count, then `(vertex, x, y, z)` records.
    ///
    /// Positive vertex fields are 1-based interior vertices, negative ones
    /// mark border vertices as `-(index + 1)`.
    pub fn from_reader<R: Read>(input: &mut R) -> Result<Self> {
        let magic = input.read_i32::<BigEndian>()?;
        if magic != PATCH_MAGIC {
            return Err(NsdFlatError::Parse(format!(
                "patch magic {} (expected {})",
                magic, PATCH_MAGIC
            )));
        }
        let num_points = input.read_i32::<BigEndian>()?;
        if num_points < 0 {
            return Err(NsdFlatError::Parse(format!(
                "negative patch point count {}",
                num_points
            )));
        }

        let mut coords: Vec<Option<Point2<f64>>> = Vec::new();
        for _ in 0..num_points {
            let raw = input.read_i32::<BigEndian>()?;
            let x = input.read_f32::<BigEndian>()? as f64;
            let y = input.read_f32::<BigEndian>()? as f64;
            let _z = input.read_f32::<BigEndian>()?;

            let vertex = match raw {
                0 => return Err(NsdFlatError::Parse("patch vertex field is 0".to_string())),
                r if r > 0 => (r - 1) as usize,
                r => (-(r as i64) - 1) as usize,
            };
            if coords.len() <= vertex {
                coords.resize(vertex + 1, None);
            }
            coords[vertex] = Some(Point2::new(x, y));
        }

        Ok(Self { coords })
    }

    /// Encode in the binary patch format (all vertices written as interior).
    pub fn to_bytes(&self) -> Vec<u8> {
        let points: Vec<(usize, &Point2<f64>)> = self
            .coords
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|p| (i, p)))
            .collect();

        let mut out = Vec::with_capacity(8 + points.len() * 16);
        out.extend_from_slice(&PATCH_MAGIC.to_be_bytes());
        out.extend_from_slice(&(points.len() as i32).to_be_bytes());
        for (vertex, p) in points {
            out.extend_from_slice(&(vertex as i32 + 1).to_be_bytes());
            out.extend_from_slice(&(p.x as f32).to_be_bytes());
            out.extend_from_slice(&(p.y as f32).to_be_bytes());
            out.extend_from_slice(&0f32.to_be_bytes());
        }
        out
    }

    pub fn get(&self, vertex: usize) -> Option<Point2<f64>> {
        self.coords.get(vertex).copied().flatten()
    }
}

/// Translation `[x, y]` in mm added to the flat coordinates of each hemisphere
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemisphereOffsets {
    pub lh: [f64; 2],
    pub rh: [f64; 2],
}

impl HemisphereOffsets {
    pub fn get(&self, hemi: Hemisphere) -> Vector2<f64> {
        let [x, y] = match hemi {
            Hemisphere::Lh => self.lh,
            Hemisphere::Rh => self.rh,
        };
        Vector2::new(x, y)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lh.iter().chain(self.rh.iter()).all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(NsdFlatError::Config(format!(
                "hemisphere offsets must be finite, got {:?}",
                self
            )))
        }
    }
}

/// Flat coordinates of both hemispheres placed in one shared plane
#[derive(Debug, Clone, PartialEq)]
pub struct FlatSurface {
    pub lh: FlatPatch,
    pub rh: FlatPatch,
    pub offsets: HemisphereOffsets,
}

impl FlatSurface {
    pub fn new(lh: FlatPatch, rh: FlatPatch) -> Self {
        Self {
            lh,
            rh,
            offsets: HemisphereOffsets::default(),
        }
    }

    pub fn with_offsets(mut self, offsets: HemisphereOffsets) -> Self {
        self.offsets = offsets;
        self
    }

    /// Load `lh` and `rh` patches through `path_for`.
    pub fn from_files<F>(path_for: F) -> Result<Self>
    where
        F: Fn(Hemisphere) -> std::path::PathBuf,
    {
        Ok(Self::new(
            FlatPatch::from_file(&path_for(Hemisphere::Lh))?,
            FlatPatch::from_file(&path_for(Hemisphere::Rh))?,
        ))
    }

    pub fn patch(&self, hemi: Hemisphere) -> &FlatPatch {
        match hemi {
            Hemisphere::Lh => &self.lh,
            Hemisphere::Rh => &self.rh,
        }
    }
}

impl FlatSurfaceProvider for FlatSurface {
    fn extract_patch(&self, mask: &CombinedMask) -> Result<Vec<Point2<f64>>> {
        let mut points = Vec::with_capacity(mask.count());
        let mut bounds = Vec::with_capacity(2);
        for hemi in Hemisphere::ALL {
            let patch = self.patch(hemi);
            let offset = self.offsets.get(hemi);
            let start = points.len();
            for (vertex, _) in mask
                .hemisphere(hemi)
                .iter()
                .enumerate()
                .filter(|(_, &inside)| inside)
            {
                let point = patch.get(vertex).ok_or_else(|| {
                    NsdFlatError::Shape(format!(
                        "ROI vertex {} of {} has no flat coordinate",
                        vertex, hemi
                    ))
                })?;
                points.push(point + offset);
            }
            bounds.push(bounding_box(&points[start..]));
        }

        if let [Some(lh), Some(rh)] = bounds[..] {
            if boxes_overlap(lh, rh) {
                log::warn!(
                    "lh and rh ROI patches overlap in the flat plane (lh {:?}, rh {:?}); \
                     set hemisphere_offsets to separate them",
                    lh,
                    rh
                );
            }
        }
        Ok(points)
    }
}

/// Axis-aligned `(min, max)` corners, `None` for no points
fn bounding_box(points: &[Point2<f64>]) -> Option<(Point2<f64>, Point2<f64>)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(lo, hi), p| {
        (
            Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
            Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
        )
    }))
}

fn boxes_overlap(a: (Point2<f64>, Point2<f64>), b: (Point2<f64>, Point2<f64>)) -> bool {
    a.0.x < b.1.x && b.0.x < a.1.x && a.0.y < b.1.y && b.0.y < a.1.y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::HemisphereMask;

    fn patch(coords: &[Option<(f64, f64)>]) -> FlatPatch {
        FlatPatch {
            coords: coords
                .iter()
                .map(|c| c.map(|(x, y)| Point2::new(x, y)))
                .collect(),
        }
    }

    #[test]
    fn test_patch_roundtrip() {
        let original = patch(&[Some((1.0, 2.0)), None, Some((-3.5, 0.25))]);
        let parsed = FlatPatch::from_reader(&mut Cursor::new(original.to_bytes())).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_border_vertices_are_decoded() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PATCH_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&(-3i32).to_be_bytes());
        for v in [4.0f32, 5.0, 0.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let parsed = FlatPatch::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.get(2), Some(Point2::new(4.0, 5.0)));
        assert_eq!(parsed.get(0), None);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = 7i32.to_be_bytes().to_vec();
        assert!(FlatPatch::from_reader(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_extract_patch_order() {
        let surface = FlatSurface::new(
            patch(&[Some((0.0, 0.0)), Some((1.0, 0.0)), Some((2.0, 0.0))]),
            patch(&[Some((10.0, 0.0)), Some((11.0, 0.0))]),
        );
        let mask = CombinedMask::new(
            &HemisphereMask::new(Hemisphere::Lh, vec![false, true, true]),
            &HemisphereMask::new(Hemisphere::Rh, vec![true, false]),
        );
        let points = surface.extract_patch(&mask).unwrap();
        assert_eq!(
            points,
            vec![Point2::new(1.0, 0.0), Point2::new(2.0, 0.0), Point2::new(10.0, 0.0)]
        );
    }

    #[test]
    fn test_extract_patch_rejects_cut_vertex() {
        let surface = FlatSurface::new(patch(&[Some((0.0, 0.0)), None]), patch(&[]));
        let mask = CombinedMask::new(
            &HemisphereMask::new(Hemisphere::Lh, vec![true, true]),
            &HemisphereMask::new(Hemisphere::Rh, vec![]),
        );
        assert!(matches!(
            surface.extract_patch(&mask),
            Err(NsdFlatError::Shape(_))
        ));
    }

    #[test]
    fn test_offsets_shift_each_hemisphere() {
        let surface = FlatSurface::new(
            patch(&[Some((-1.0, 2.0))]),
            patch(&[Some((-1.0, 2.0))]),
        )
        .with_offsets(HemisphereOffsets {
            lh: [-50.0, 0.0],
            rh: [50.0, 1.0],
        });
        let mask = CombinedMask::new(
            &HemisphereMask::new(Hemisphere::Lh, vec![true]),
            &HemisphereMask::new(Hemisphere::Rh, vec![true]),
        );
        assert_eq!(
            surface.extract_patch(&mask).unwrap(),
            vec![Point2::new(-51.0, 2.0), Point2::new(49.0, 3.0)]
        );
    }

    #[test]
    fn test_overlap_detection() {
        let lh = bounding_box(&[Point2::new(-10.0, -5.0), Point2::new(5.0, 5.0)]).unwrap();
        let rh = bounding_box(&[Point2::new(0.0, 0.0), Point2::new(20.0, 8.0)]).unwrap();
        let far = bounding_box(&[Point2::new(30.0, 0.0), Point2::new(40.0, 8.0)]).unwrap();
        assert!(boxes_overlap(lh, rh));
        assert!(!boxes_overlap(lh, far));
        assert_eq!(bounding_box(&[]), None);
    }

    #[test]
    fn test_offsets_from_partial_json() {
        let offsets: HemisphereOffsets = serde_json::from_str(r#"{"rh": [100.0, 0.0]}"#).unwrap();
        assert_eq!(offsets.lh, [0.0, 0.0]);
        assert_eq!(offsets.get(Hemisphere::Rh), Vector2::new(100.0, 0.0));
        assert!(HemisphereOffsets { lh: [f64::NAN, 0.0], rh: [0.0; 2] }
            .validate()
            .is_err());
    }
}
