//! Stimulus image stores.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use memmap2::Mmap;

use crate::error::{NsdFlatError, Result};
use crate::mmap_utils::mmap_file;

/// Source of stimulus images keyed by NSD id
pub trait StimulusImages: Send + Sync {
    fn get(&self, nsd_id: u32) -> Result<RgbImage>;

    /// Number of stimuli, when the store knows it up front
    fn len(&self) -> Option<usize> {
        None
    }
}

/// Square RGB images packed back to back in one raw `u8` file
///
/// The file holds `N x size x size x 3` bytes with no header.
pub struct ImageBrick {
    mmap: Mmap,
    size: u32,
    count: usize,
}

impl ImageBrick {
    pub fn open(path: &Path, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(NsdFlatError::Config("stimulus size must be positive".to_string()));
        }
        let mmap = mmap_file(path)?;

        let frame = Self::frame_len(size);
        if mmap.len() % frame != 0 {
            return Err(NsdFlatError::Shape(format!(
                "{} holds {} bytes, not a multiple of one {}x{} RGB frame",
                path.display(),
                mmap.len(),
                size,
                size
            )));
        }
        let count = mmap.len() / frame;
        log::info!(
            "Mapped stimulus brick {} ({} images of {}x{})",
            path.display(),
            count,
            size,
            size
        );

        Ok(Self { mmap, size, count })
    }

    fn frame_len(size: u32) -> usize {
        size as usize * size as usize * 3
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

impl StimulusImages for ImageBrick {
    fn get(&self, nsd_id: u32) -> Result<RgbImage> {
        let index = nsd_id as usize;
        if index >= self.count {
            return Err(NsdFlatError::NotFound(format!(
                "stimulus {} (brick holds {})",
                nsd_id, self.count
            )));
        }
        let frame = Self::frame_len(self.size);
        let bytes = self.mmap[index * frame..(index + 1) * frame].to_vec();
        RgbImage::from_raw(self.size, self.size, bytes)
            .ok_or_else(|| NsdFlatError::Shape(format!("stimulus {} frame is truncated", nsd_id)))
    }

    fn len(&self) -> Option<usize> {
        Some(self.count)
    }
}

/// The `imgBrick` dataset of `nsd_stimuli.hdf5`, shaped `N x H x W x 3`
///
/// Only the requested image is read from disk.
#[cfg(feature = "hdf5")]
pub struct Hdf5ImageBrick {
    _file: hdf5::File,
    dataset: hdf5::Dataset,
    count: usize,
}

#[cfg(feature = "hdf5")]
impl Hdf5ImageBrick {
    pub const DATASET: &'static str = "imgBrick";

    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(NsdFlatError::NotFound(path.display().to_string()));
        }
        let file = hdf5::File::open(path)?;
        let dataset = file.dataset(Self::DATASET)?;

        let shape = dataset.shape();
        if shape.len() != 4 || shape[3] != 3 {
            return Err(NsdFlatError::Shape(format!(
                "{}/{} has shape {:?}, expected N x H x W x 3",
                path.display(),
                Self::DATASET,
                shape
            )));
        }
        log::info!(
            "Opened stimulus brick {} ({} images of {}x{})",
            path.display(),
            shape[0],
            shape[2],
            shape[1]
        );

        Ok(Self {
            _file: file,
            dataset,
            count: shape[0],
        })
    }
}

#[cfg(feature = "hdf5")]
impl StimulusImages for Hdf5ImageBrick {
    fn get(&self, nsd_id: u32) -> Result<RgbImage> {
        let index = nsd_id as usize;
        if index >= self.count {
            return Err(NsdFlatError::NotFound(format!(
                "stimulus {} (brick holds {})",
                nsd_id, self.count
            )));
        }

        let frame: ndarray::Array3<u8> = self.dataset.read_slice(ndarray::s![index, .., .., ..])?;
        let (height, width, _) = frame.dim();
        let bytes: Vec<u8> = frame.iter().copied().collect();
        RgbImage::from_raw(width as u32, height as u32, bytes)
            .ok_or_else(|| NsdFlatError::Shape(format!("stimulus {} frame is truncated", nsd_id)))
    }

    fn len(&self) -> Option<usize> {
        Some(self.count)
    }
}

/// One image file per stimulus at `{dir}/{nsd_id}.png`
pub struct ImageDirectory {
    dir: PathBuf,
}

impl ImageDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, nsd_id: u32) -> PathBuf {
        self.dir.join(format!("{}.png", nsd_id))
    }
}

impl StimulusImages for ImageDirectory {
    fn get(&self, nsd_id: u32) -> Result<RgbImage> {
        let path = self.path_for(nsd_id);
        if !path.exists() {
            return Err(NsdFlatError::NotFound(path.display().to_string()));
        }
        Ok(image::open(&path)?.to_rgb8())
    }
}

/// Bicubic resize to a `size x size` square.
pub fn resize_square(img: &RgbImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.clone();
    }
    image::imageops::resize(img, size, size, FilterType::CatmullRom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn brick_bytes(count: usize, size: u32) -> Vec<u8> {
        let frame = (size * size * 3) as usize;
        (0..count).flat_map(|i| vec![i as u8 * 10; frame]).collect()
    }

    #[test]
    fn test_brick_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("brick.u8");
        std::fs::write(&path, brick_bytes(3, 4)).unwrap();

        let brick = ImageBrick::open(&path, 4).unwrap();
        assert_eq!(brick.len(), Some(3));
        let img = brick.get(2).unwrap();
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(img.get_pixel(3, 3), &Rgb([20, 20, 20]));
    }

    #[test]
    fn test_brick_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("brick.u8");
        std::fs::write(&path, brick_bytes(1, 2)).unwrap();
        let brick = ImageBrick::open(&path, 2).unwrap();
        assert!(matches!(brick.get(1), Err(NsdFlatError::NotFound(_))));
    }

    #[test]
    fn test_brick_rejects_partial_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("brick.u8");
        std::fs::write(&path, vec![0u8; 13]).unwrap();
        assert!(matches!(
            ImageBrick::open(&path, 2),
            Err(NsdFlatError::Shape(_))
        ));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_hdf5_brick_reads_one_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nsd_stimuli.hdf5");

        // Three 4x5 images; pixel (x, y) of image i is [i, y, x]
        let brick = ndarray::Array4::from_shape_fn((3, 4, 5, 3), |(i, y, x, c)| match c {
            0 => i as u8,
            1 => y as u8,
            _ => x as u8,
        });
        let file = hdf5::File::create(&path).unwrap();
        file.new_dataset::<u8>()
            .shape((3, 4, 5, 3))
            .create(Hdf5ImageBrick::DATASET)
            .unwrap()
            .write(brick.view())
            .unwrap();
        drop(file);

        let store = Hdf5ImageBrick::open(&path).unwrap();
        assert_eq!(store.len(), Some(3));
        let img = store.get(2).unwrap();
        assert_eq!(img.dimensions(), (5, 4));
        assert_eq!(img.get_pixel(4, 1), &Rgb([2, 1, 4]));
        assert!(matches!(store.get(3), Err(NsdFlatError::NotFound(_))));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_hdf5_brick_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Hdf5ImageBrick::open(&dir.path().join("nsd_stimuli.hdf5")),
            Err(NsdFlatError::NotFound(_))
        ));
    }

    #[test]
    fn test_image_directory() {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]))
            .save(dir.path().join("7.png"))
            .unwrap();

        let store = ImageDirectory::new(dir.path());
        assert_eq!(store.get(7).unwrap().get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert!(matches!(store.get(8), Err(NsdFlatError::NotFound(_))));
    }

    #[test]
    fn test_resize_square() {
        let img = RgbImage::from_pixel(10, 10, Rgb([50, 100, 150]));
        let resized = resize_square(&img, 4);
        assert_eq!(resized.dimensions(), (4, 4));
        let Rgb([r, _, b]) = *resized.get_pixel(1, 2);
        assert!(r.abs_diff(50) <= 1 && b.abs_diff(150) <= 1);
        assert_eq!(resize_square(&img, 10), img);
    }
}
