//! Trial and session arithmetic.
//!
//! NSD numbers trials per subject with one flat counter. Each scan session
//! holds the same number of trials, so the counter decomposes into a
//! 0-based session index and a within-session trial index.

use std::ops::Range;

use crate::error::{NsdFlatError, Result};
use crate::types::Split;

/// Trials per session for `num_trials` spread evenly over `max_sessions`.
pub fn trials_per_session(num_trials: usize, max_sessions: usize) -> Result<usize> {
    if max_sessions == 0 {
        return Err(NsdFlatError::Config("max_sessions must be positive".to_string()));
    }
    if num_trials % max_sessions != 0 {
        return Err(NsdFlatError::Config(format!(
            "num_trials ({}) is not divisible by max_sessions ({})",
            num_trials, max_sessions
        )));
    }
    Ok(num_trials / max_sessions)
}

/// Global trial id of the `trial`-th trial (0-based) of session `session` (0-based).
pub fn global_trial_id(session: usize, trial: usize, trials_per_session: usize) -> usize {
    session * trials_per_session + trial
}

/// Inverse of [`global_trial_id`]: `(session, trial_in_session)`.
pub fn split_trial_id(trial_id: usize, trials_per_session: usize) -> (usize, usize) {
    (trial_id / trials_per_session, trial_id % trials_per_session)
}

/// Session indices emitted for `split`.
///
/// The last `held_out` sessions form the test split, everything before them the train split.
pub fn session_range(sessions_available: usize, held_out: usize, split: Split) -> Result<Range<usize>> {
    if held_out > sessions_available {
        return Err(NsdFlatError::Config(format!(
            "cannot hold out {} sessions from {} available",
            held_out, sessions_available
        )));
    }
    let boundary = sessions_available - held_out;
    Ok(match split {
        Split::Train => 0..boundary,
        Split::Test => boundary..sessions_available,
    })
}
