//! Trial record assembly.
//!
//! [`DatasetGenerator`] owns the configuration and the collaborator sources.
//! [`DatasetGenerator::records`] returns a lazy [`TrialRecords`] iterator that
//! walks subjects in table order, sessions ascending, trials ascending. Each
//! subject's resampler is fitted once when the walk reaches it, and only one
//! session of activity is held at a time.

use std::ops::Range;

use ndarray::Array2;

use crate::activity::{load_session_activity, ActivitySource, MghActivityStore};
use crate::config::{DataLayout, DatasetConfig, GenerateOptions, SubjectInfo};
use crate::error::{NsdFlatError, Result};
use crate::indexing::global_trial_id;
use crate::mask::{MaskSource, NpyMaskSource, SubjectMasks};
use crate::profiling::ProfileScope;
use crate::raster::{Quantizer, Rasterizer};
use crate::resample::Resampler;
#[cfg(feature = "hdf5")]
use crate::stimuli::Hdf5ImageBrick;
use crate::stimuli::{resize_square, ImageBrick, ImageDirectory, StimulusImages};
use crate::surface::{FlatSurface, FlatSurfaceProvider};
use crate::tables::{AnnotationTable, CsvTrialInfoTable, JsonlAnnotationTable, TrialInfoTable};
use crate::types::{Split, TrialRecord};

/// Every external input the generator reads from
pub struct DataSources {
    pub masks: Box<dyn MaskSource>,
    pub surface: Box<dyn FlatSurfaceProvider>,
    pub activity: Box<dyn ActivitySource>,
    pub stimuli: Box<dyn StimulusImages>,
    pub trial_info: Box<dyn TrialInfoTable>,
    pub annotations: Box<dyn AnnotationTable>,
}

impl DataSources {
    /// File-backed sources below `layout.root`.
    ///
    /// Stimuli come from the first store present: `nsd_stimuli.hdf5` (with
    /// the `hdf5` feature), the raw image brick, then the per-image directory.
    pub fn from_layout(layout: &DataLayout, config: &DatasetConfig) -> Result<Self> {
        crate::profile_scope!("load data sources");

        let mask_layout = layout.clone();
        let masks = NpyMaskSource::new(move |subject, hemi| mask_layout.mask_path(subject, hemi));

        let surface = FlatSurface::from_files(|hemi| layout.flat_patch_path(hemi))?
            .with_offsets(config.hemisphere_offsets);

        let betas_layout = layout.clone();
        let activity = MghActivityStore::new(move |subject, hemi, session| {
            betas_layout.session_betas_path(subject, hemi, session)
        });

        let stimuli = open_stimuli(layout, config)?;

        let trial_info = CsvTrialInfoTable::from_path(&layout.stim_info_path())?;
        let annotations = JsonlAnnotationTable::from_path(&layout.annotations_path())?;

        Ok(Self {
            masks: Box::new(masks),
            surface: Box::new(surface),
            activity: Box::new(activity),
            stimuli,
            trial_info: Box::new(trial_info),
            annotations: Box::new(annotations),
        })
    }
}

fn open_stimuli(layout: &DataLayout, config: &DatasetConfig) -> Result<Box<dyn StimulusImages>> {
    let hdf5_path = layout.stimuli_hdf5_path();
    if hdf5_path.exists() {
        #[cfg(feature = "hdf5")]
        return Ok(Box::new(Hdf5ImageBrick::open(&hdf5_path)?));

        #[cfg(not(feature = "hdf5"))]
        log::warn!(
            "Ignoring {}: built without the hdf5 feature",
            hdf5_path.display()
        );
    }

    let brick_path = layout.stimuli_brick_path();
    if brick_path.exists() {
        return Ok(Box::new(ImageBrick::open(&brick_path, config.image_size)?));
    }

    log::info!(
        "No stimulus brick below {}, reading images from {}",
        layout.stimuli_dir().display(),
        layout.stimuli_image_dir().display()
    );
    Ok(Box::new(ImageDirectory::new(layout.stimuli_image_dir())))
}

pub struct DatasetGenerator {
    config: DatasetConfig,
    sources: DataSources,
}

impl DatasetGenerator {
    pub fn new(config: DatasetConfig, sources: DataSources) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sources })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Subjects selected by `filter`, paired with their table index, in table order.
    pub fn select_subjects(&self, filter: Option<&[String]>) -> Result<Vec<(usize, SubjectInfo)>> {
        let Some(names) = filter else {
            return Ok(self.config.subjects.iter().cloned().enumerate().collect());
        };

        if let Some(unknown) = names.iter().find(|n| self.config.subject(n).is_none()) {
            return Err(NsdFlatError::Config(format!(
                "subject {} is not in the subject table",
                unknown
            )));
        }
        Ok(self
            .config
            .subjects
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, s)| names.contains(&s.name))
            .collect())
    }

    /// Fit the resampler for one subject's ROI.
    pub fn fit_resampler(&self, subject: &str, masks: &SubjectMasks) -> Result<Resampler> {
        let _scope = ProfileScope::new(format!("{} resampler fit", subject));
        let combined = masks.combined();
        let points = self.sources.surface.extract_patch(&combined)?;
        log::info!("{}: ROI size {}", subject, points.len());

        let resampler = Resampler::fit(self.config.pixel_size, self.config.map_rect, &points)?;
        log::info!(
            "{}: raster mask size {}",
            subject,
            resampler.mask().iter().filter(|&&m| m).count()
        );
        Ok(resampler)
    }

    /// Lazily assemble the records of one split.
    ///
    /// Configuration problems surface here, before any data is read.
    pub fn records(&self, options: &GenerateOptions) -> Result<TrialRecords<'_>> {
        if options.img_size == Some(0) {
            return Err(NsdFlatError::Config("image size must be positive".to_string()));
        }

        let subjects = self.select_subjects(options.subjects.as_deref())?;
        let mut plan = Vec::with_capacity(subjects.len());
        for (index, info) in subjects {
            let sessions = self.config.session_range(&info, options.split)?;
            plan.push(SubjectPlan {
                index,
                info,
                sessions,
            });
        }

        Ok(TrialRecords {
            assembler: Assembler {
                generator: self,
                quantizer: Quantizer::symmetric(self.config.vmax)?,
                img_size: options.img_size,
            },
            split: options.split,
            debug: options.debug,
            debug_trials: options.debug_trials,
            plan: plan.into_iter(),
            subject: None,
            session: None,
            finished: false,
        })
    }
}

struct SubjectPlan {
    index: usize,
    info: SubjectInfo,
    sessions: Range<usize>,
}

struct SubjectState {
    index: usize,
    name: String,
    resampler: Resampler,
    masks: SubjectMasks,
    sessions: Range<usize>,
}

struct SessionState {
    session: usize,
    activity: Array2<f32>,
    limit: usize,
    next_trial: usize,
}

/// Lazy stream of [`TrialRecord`]s
///
/// Yields `None` forever after the first error.
pub struct TrialRecords<'a> {
    assembler: Assembler<'a>,
    split: Split,
    debug: bool,
    debug_trials: Option<usize>,
    plan: std::vec::IntoIter<SubjectPlan>,
    subject: Option<SubjectState>,
    session: Option<SessionState>,
    finished: bool,
}

impl TrialRecords<'_> {
    fn advance(&mut self) -> Result<Option<TrialRecord>> {
        let assembler = self.assembler;
        loop {
            if let (Some(subject), Some(session)) = (&self.subject, &mut self.session) {
                if session.next_trial < session.limit {
                    let trial = session.next_trial;
                    session.next_trial += 1;
                    let record =
                        assembler.assemble(subject, session.session, trial, &session.activity)?;
                    return Ok(Some(record));
                }
                self.session = None;
                if self.debug {
                    log::info!("Debug run: stopping after the first session");
                    return Ok(None);
                }
            }

            if let Some(subject) = &mut self.subject {
                if let Some(session) = subject.sessions.next() {
                    self.session = Some(self.load_session(session)?);
                    continue;
                }
                self.subject = None;
            }

            match self.plan.next() {
                Some(plan) => self.subject = Some(self.start_subject(plan)?),
                None => return Ok(None),
            }
        }
    }

    fn start_subject(&self, plan: SubjectPlan) -> Result<SubjectState> {
        let name = plan.info.name;
        log::info!("Processing {} (index {})", name, plan.index);

        let masks = self.assembler.generator.sources.masks.load_subject(&name)?;
        let resampler = self.assembler.generator.fit_resampler(&name, &masks)?;
        log::info!(
            "{}: {} sessions: {:?}",
            name,
            self.split,
            plan.sessions.clone().collect::<Vec<_>>()
        );

        Ok(SubjectState {
            index: plan.index,
            name,
            resampler,
            masks,
            sessions: plan.sessions,
        })
    }

    fn load_session(&self, session: usize) -> Result<SessionState> {
        let subject = self
            .subject
            .as_ref()
            .ok_or_else(|| NsdFlatError::Config("session requested without a subject".to_string()))?;
        let _scope = ProfileScope::new(format!("{} session {} load", subject.name, session));

        let activity = load_session_activity(
            self.assembler.generator.sources.activity.as_ref(),
            &subject.name,
            session,
            &subject.masks,
        )?;

        let trials_per_session = self.assembler.generator.config.trials_per_session();
        if activity.nrows() > trials_per_session {
            return Err(NsdFlatError::Shape(format!(
                "{} session {} has {} trials, more than {} per session",
                subject.name,
                session,
                activity.nrows(),
                trials_per_session
            )));
        }

        let limit = match (self.debug, self.debug_trials) {
            (true, Some(n)) => activity.nrows().min(n),
            _ => activity.nrows(),
        };
        Ok(SessionState {
            session,
            activity,
            limit,
            next_trial: 0,
        })
    }
}

/// Per-run state shared by every record of a stream
#[derive(Clone, Copy)]
struct Assembler<'a> {
    generator: &'a DatasetGenerator,
    quantizer: Quantizer,
    img_size: Option<u32>,
}

impl Assembler<'_> {
    fn assemble(
        &self,
        subject: &SubjectState,
        session: usize,
        trial: usize,
        activity: &Array2<f32>,
    ) -> Result<TrialRecord> {
        let generator = self.generator;
        let trial_id = global_trial_id(session, trial, generator.config.trials_per_session());

        let info = generator.sources.trial_info.get(subject.index, trial_id)?;
        let nsd_id = info.nsd_id()?;

        let mut image = generator.sources.stimuli.get(nsd_id)?;
        if let Some(size) = self.img_size {
            image = resize_square(&image, size);
        }

        let rasterizer = Rasterizer::new(&subject.resampler, self.quantizer);
        let activity = rasterizer.render(activity.row(trial))?;

        let annotation = generator.sources.annotations.get(nsd_id)?;

        Ok(TrialRecord {
            subject_id: subject.index,
            trial_id,
            session_id: session,
            nsd_id,
            image,
            activity,
            subject: subject.name.clone(),
            flagged: info.flag("flagged")?,
            bold5000: info.flag("BOLD5000")?,
            shared1000: info.flag("shared1000")?,
            coco_split: annotation.coco_split,
            coco_id: annotation.coco_id,
            objects: annotation.objects,
            captions: annotation.captions,
            repetitions: info.repetitions(),
        })
    }
}

impl Iterator for TrialRecords<'_> {
    type Item = Result<TrialRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for TrialRecords<'_> {}
