use crate::error::{NsdFlatError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Open a file and map it into memory (read-only)
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
    // The stimulus brick is never written while a generation run holds the map.
    let mmap = unsafe { Mmap::map(&file).map_err(NsdFlatError::IoError)? };
    Ok(mmap)
}
