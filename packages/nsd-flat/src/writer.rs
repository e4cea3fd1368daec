//! On-disk persistence of a generated split.
//!
//! Layout below the split directory:
//!
//! ```text
//! activity/{index:06}.png   quantized flat map (grayscale)
//! image/{index:06}.png      stimulus (RGB)
//! metadata.jsonl            one JSON object per record, in stream order
//! manifest.json             split summary written by `finish`
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DatasetConfig, GenerateOptions};
use crate::error::{NsdFlatError, Result};
use crate::types::{Split, TrialRecord};

pub const METADATA_FILE: &str = "metadata.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

/// `{out}/size-{img_size}{-debug}/{split}`, where `img_size` falls back to the native size
pub fn output_dir(out: &Path, options: &GenerateOptions, native_size: u32) -> PathBuf {
    let size = options.img_size.unwrap_or(native_size);
    let suffix = if options.debug { "-debug" } else { "" };
    out.join(format!("size-{}{}", size, suffix))
        .join(options.split.as_str())
}

#[derive(Serialize)]
struct MetadataLine<'a> {
    index: usize,
    #[serde(flatten)]
    record: &'a TrialRecord,
    image: String,
    activity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub split: Split,
    pub num_records: usize,
    pub img_size: Option<u32>,
    pub debug: bool,
    pub config: DatasetConfig,
    pub created_at: DateTime<Utc>,
}

pub struct DatasetWriter {
    dir: PathBuf,
    pool: rayon::ThreadPool,
    metadata: BufWriter<File>,
    count: usize,
}

impl DatasetWriter {
    /// Create the split directory, replacing any previous contents.
    pub fn create(dir: &Path, workers: usize) -> Result<Self> {
        if dir.exists() {
            log::info!("Removing existing output {}", dir.display());
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir.join("activity"))?;
        std::fs::create_dir_all(dir.join("image"))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| NsdFlatError::Config(format!("cannot start {} workers: {}", workers, e)))?;
        let metadata = BufWriter::new(File::create(dir.join(METADATA_FILE))?);

        Ok(Self {
            dir: dir.to_path_buf(),
            pool,
            metadata,
            count: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records written so far
    pub fn count(&self) -> usize {
        self.count
    }

    fn relative_paths(index: usize) -> (String, String) {
        (
            format!("image/{:06}.png", index),
            format!("activity/{:06}.png", index),
        )
    }

    /// Write a batch: PNGs are encoded on the worker pool, metadata in order.
    pub fn write_batch(&mut self, records: &[TrialRecord]) -> Result<()> {
        let first = self.count;
        let dir = &self.dir;

        self.pool.install(|| {
            records
                .par_iter()
                .enumerate()
                .try_for_each(|(offset, record)| -> Result<()> {
                    let (image, activity) = Self::relative_paths(first + offset);
                    record.image.save(dir.join(image))?;
                    record.activity.save(dir.join(activity))?;
                    Ok(())
                })
        })?;

        for (offset, record) in records.iter().enumerate() {
            let index = first + offset;
            let (image, activity) = Self::relative_paths(index);
            let line = MetadataLine {
                index,
                record,
                image,
                activity,
            };
            serde_json::to_writer(&mut self.metadata, &line)?;
            self.metadata.write_all(b"\n")?;
        }
        self.count += records.len();
        Ok(())
    }

    /// Drain `records` in batches of `batch_size`, stopping at the first error.
    pub fn write_all<I>(&mut self, records: I, batch_size: usize) -> Result<usize>
    where
        I: IntoIterator<Item = Result<TrialRecord>>,
    {
        let batch_size = batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        for record in records {
            batch.push(record?);
            if batch.len() == batch_size {
                self.write_batch(&batch)?;
                batch.clear();
                log::info!("Wrote {} records", self.count);
            }
        }
        if !batch.is_empty() {
            self.write_batch(&batch)?;
        }
        Ok(self.count)
    }

    /// Flush metadata and write the manifest.
    pub fn finish(mut self, options: &GenerateOptions, config: &DatasetConfig) -> Result<Manifest> {
        self.metadata.flush()?;

        let manifest = Manifest {
            split: options.split,
            num_records: self.count,
            img_size: options.img_size,
            debug: options.debug,
            config: config.clone(),
            created_at: Utc::now(),
        };
        let file = File::create(self.dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &manifest)?;
        log::info!("Wrote {} records to {}", self.count, self.dir.display());
        Ok(manifest)
    }
}
