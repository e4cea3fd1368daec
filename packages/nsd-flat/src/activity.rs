//! Per-session surface activity.
//!
//! Raw betas are loaded per hemisphere as `trials x vertices`, restricted to
//! the ROI and z-scored per vertex over the trials of the session. The two
//! hemispheres are then concatenated left-then-right.

use std::path::PathBuf;

use ndarray::{concatenate, Array2, Axis};

use crate::error::{NsdFlatError, Result};
use crate::mask::{HemisphereMask, SubjectMasks};
use crate::mgh;
use crate::types::Hemisphere;

/// Source of raw per-session activity
pub trait ActivitySource: Send + Sync {
    /// Raw `trials x vertices` activity of one hemisphere for a 0-based session.
    fn load(&self, subject: &str, hemi: Hemisphere, session: usize) -> Result<Array2<f32>>;
}

/// Betas stored as one MGH (or MGZ) file per subject, hemisphere and session
pub struct MghActivityStore {
    path_for: Box<dyn Fn(&str, Hemisphere, usize) -> PathBuf + Send + Sync>,
}

impl MghActivityStore {
    pub fn new<F>(path_for: F) -> Self
    where
        F: Fn(&str, Hemisphere, usize) -> PathBuf + Send + Sync + 'static,
    {
        Self {
            path_for: Box::new(path_for),
        }
    }
}

impl ActivitySource for MghActivityStore {
    fn load(&self, subject: &str, hemi: Hemisphere, session: usize) -> Result<Array2<f32>> {
        let path = (self.path_for)(subject, hemi, session);
        let path = if !path.exists() && path.extension().is_some_and(|e| e == "mgh") {
            let mgz = path.with_extension("mgz");
            if mgz.exists() {
                mgz
            } else {
                path
            }
        } else {
            path
        };

        log::debug!("Loading {} activity from {}", hemi, path.display());
        mgh::read_surface_frames(&path)
    }
}

/// Keep the columns selected by `mask`.
pub fn select_columns(activity: &Array2<f32>, mask: &HemisphereMask) -> Result<Array2<f32>> {
    if activity.ncols() != mask.len() {
        return Err(NsdFlatError::Shape(format!(
            "{} activity has {} vertices, mask has {}",
            mask.hemi,
            activity.ncols(),
            mask.len()
        )));
    }
    Ok(activity.select(Axis(1), &mask.indices()))
}

/// Standardize each column to zero mean and unit variance over the rows.
///
/// Uses the population standard deviation. Constant columns are only centered.
pub fn zscore_columns(activity: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = activity.dim();
    let mut out = Array2::<f32>::zeros((rows, cols));
    if rows == 0 {
        return out;
    }

    for (col_in, mut col_out) in activity.columns().into_iter().zip(out.columns_mut()) {
        let n = rows as f64;
        let mean = col_in.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = col_in
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std == 0.0 { 1.0 } else { std };

        for (o, &v) in col_out.iter_mut().zip(col_in.iter()) {
            *o = ((v as f64 - mean) / scale) as f32;
        }
    }
    out
}

/// Load, restrict and normalize one session of one subject.
///
/// Returns `trials x roi_vertices` with columns in combined-mask order.
pub fn load_session_activity(
    source: &dyn ActivitySource,
    subject: &str,
    session: usize,
    masks: &SubjectMasks,
) -> Result<Array2<f32>> {
    let mut hemis = Vec::with_capacity(2);
    for hemi in Hemisphere::ALL {
        let raw = source.load(subject, hemi, session)?;
        let roi = select_columns(&raw, masks.get(hemi))?;
        hemis.push(zscore_columns(&roi));
    }

    if hemis[0].nrows() != hemis[1].nrows() {
        return Err(NsdFlatError::Shape(format!(
            "{} session {}: lh has {} trials, rh has {}",
            subject,
            session,
            hemis[0].nrows(),
            hemis[1].nrows()
        )));
    }

    let activity = concatenate(Axis(1), &[hemis[0].view(), hemis[1].view()])
        .map_err(|e| NsdFlatError::Shape(e.to_string()))?;
    log::debug!(
        "{} session {}: activity shape {:?}",
        subject,
        session,
        activity.dim()
    );
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::HashMap;

    struct InMemoryActivity {
        sessions: HashMap<(Hemisphere, usize), Array2<f32>>,
    }

    impl ActivitySource for InMemoryActivity {
        fn load(&self, _subject: &str, hemi: Hemisphere, session: usize) -> Result<Array2<f32>> {
            self.sessions
                .get(&(hemi, session))
                .cloned()
                .ok_or_else(|| NsdFlatError::NotFound(format!("{} session {}", hemi, session)))
        }
    }

    fn masks() -> SubjectMasks {
        SubjectMasks::new(
            HemisphereMask::new(Hemisphere::Lh, vec![true, false, true]),
            HemisphereMask::new(Hemisphere::Rh, vec![false, true]),
        )
        .unwrap()
    }

    #[test]
    fn test_zscore_columns() {
        let data = array![[1.0f32, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let z = zscore_columns(&data);
        let expected = (1.5f64).sqrt() as f32;
        assert!((z[[0, 0]] + expected).abs() < 1e-6);
        assert!(z[[1, 0]].abs() < 1e-6);
        assert!((z[[2, 0]] - expected).abs() < 1e-6);
        // constant column is centered, not divided by zero
        assert_eq!(z.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zscore_two_trials_is_plus_minus_one() {
        let z = zscore_columns(&array![[2.0f32, -4.0], [6.0, 0.0]]);
        assert_eq!(z, array![[-1.0f32, -1.0], [1.0, 1.0]]);
    }

    #[test]
    fn test_select_columns_checks_length() {
        let mask = HemisphereMask::new(Hemisphere::Lh, vec![true, false]);
        let activity = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            select_columns(&activity, &mask),
            Err(NsdFlatError::Shape(_))
        ));
    }

    #[test]
    fn test_load_session_column_order() {
        let mut sessions = HashMap::new();
        sessions.insert(
            (Hemisphere::Lh, 0),
            array![[1.0f32, 100.0, 2.0], [3.0, 100.0, 6.0]],
        );
        sessions.insert((Hemisphere::Rh, 0), array![[0.0f32, 5.0], [0.0, 1.0]]);
        let source = InMemoryActivity { sessions };

        let activity = load_session_activity(&source, "subj01", 0, &masks()).unwrap();
        assert_eq!(activity.dim(), (2, 3));
        // lh columns 0 and 2 come first (rising), then rh column 1 (falling)
        assert_eq!(activity, array![[-1.0f32, -1.0, 1.0], [1.0, 1.0, -1.0]]);
    }

    #[test]
    fn test_load_session_trial_mismatch() {
        let mut sessions = HashMap::new();
        sessions.insert((Hemisphere::Lh, 0), Array2::<f32>::zeros((2, 3)));
        sessions.insert((Hemisphere::Rh, 0), Array2::<f32>::zeros((3, 2)));
        let source = InMemoryActivity { sessions };
        assert!(matches!(
            load_session_activity(&source, "subj01", 0, &masks()),
            Err(NsdFlatError::Shape(_))
        ));
    }

    #[test]
    fn test_missing_session_is_fatal() {
        let source = InMemoryActivity {
            sessions: HashMap::new(),
        };
        assert!(matches!(
            load_session_activity(&source, "subj01", 4, &masks()),
            Err(NsdFlatError::NotFound(_))
        ));
    }
}
