//! Surface betas stored as FreeSurfer MGH/MGZ volumes.
//!
//! NSD ships surface betas as volumes of shape `(vertices, 1, 1, trials)`
//! with the first axis varying fastest, so in file order every trial is one
//! contiguous run of vertex values.

use std::path::Path;

use ndarray::{Array2, Array4};
use neuroformats::{FsMgh, FsMghData, FsMghHeader};

use crate::error::{NsdFlatError, Result};

const MRI_FLOAT: i32 = 3;

/// Read an MGH/MGZ surface volume as `trials x vertices`, widening the data to `f32`.
pub fn read_surface_frames(path: &Path) -> Result<Array2<f32>> {
    if !path.is_file() {
        return Err(NsdFlatError::NotFound(path.display().to_string()));
    }
    let mgh = neuroformats::read_mgh(path)
        .map_err(|e| NsdFlatError::Parse(format!("{}: {}", path.display(), e)))?;

    let (dims, data) = widen(&mgh)
        .ok_or_else(|| NsdFlatError::Parse(format!("{}: MGH holds no voxel data", path.display())))?;
    frames_by_voxels(dims, data)
        .map_err(|e| NsdFlatError::Shape(format!("{}: {}", path.display(), e)))
}

/// Write `trials x vertices` frames as an `MRI_FLOAT` surface volume.
pub fn write_surface_frames(path: &Path, frames: &Array2<f32>) -> Result<()> {
    let (num_frames, num_vertices) = frames.dim();
    let header = FsMghHeader {
        dim1len: num_vertices as i32,
        dim2len: 1,
        dim3len: 1,
        dim4len: num_frames as i32,
        dtype: MRI_FLOAT,
        ..FsMghHeader::default()
    };

    // Row-major frames are already in file order
    let data: Vec<f32> = frames.iter().copied().collect();
    let volume = Array4::from_shape_vec((num_vertices, 1, 1, num_frames), data)
        .map_err(|e| NsdFlatError::Shape(e.to_string()))?;

    let mgh = FsMgh {
        header,
        data: FsMghData {
            mri_uchar: None,
            mri_float: Some(volume),
            mri_int: None,
            mri_short: None,
        },
    };
    neuroformats::write_mgh(path, &mgh)
        .map_err(|e| NsdFlatError::Parse(format!("{}: {}", path.display(), e)))
}

/// Voxel values in file order, whatever the stored data type.
fn widen(mgh: &FsMgh) -> Option<([usize; 4], Vec<f32>)> {
    fn file_order<A: Copy>(volume: &Array4<A>, to_f32: impl Fn(A) -> f32) -> ([usize; 4], Vec<f32>) {
        let shape = volume.shape();
        let dims = [shape[0], shape[1], shape[2], shape[3]];
        let data = match volume.as_slice_memory_order() {
            Some(values) => values.iter().map(|&v| to_f32(v)).collect(),
            None => volume.iter().map(|&v| to_f32(v)).collect(),
        };
        (dims, data)
    }

    if let Some(volume) = &mgh.data.mri_float {
        Some(file_order(volume, |v| v))
    } else if let Some(volume) = &mgh.data.mri_int {
        Some(file_order(volume, |v| v as f32))
    } else if let Some(volume) = &mgh.data.mri_short {
        Some(file_order(volume, f32::from))
    } else {
        mgh.data.mri_uchar
            .as_ref()
            .map(|volume| file_order(volume, f32::from))
    }
}

/// Squeeze the spatial axes and put frames first.
fn frames_by_voxels(dims: [usize; 4], data: Vec<f32>) -> std::result::Result<Array2<f32>, String> {
    let shape = (dims[3], dims[0] * dims[1] * dims[2]);
    Array2::from_shape_vec(shape, data)
        .map_err(|e| format!("MGH data does not fit {:?}: {}", shape, e))
}
