//! Batch construction: raw URL lines into ordered task descriptors

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::core::models::{BatchRejection, MediaFormat, TaskDescriptor};
use crate::utils::validation::{is_valid_media_url, looks_like_playlist, sanitize_url};

/// Result of descriptor construction. Accepted descriptors keep the input
/// order; rejections carry the offending line's index so the presentation
/// layer can mark it inline. One bad line never blocks the others.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub descriptors: Vec<TaskDescriptor>,
    pub rejections: Vec<BatchRejection>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty() && self.rejections.is_empty()
    }
}

/// Build task descriptors from raw input lines.
///
/// Lines are trimmed and blank lines discarded. `overrides` maps an input
/// line index to a format; unset entries get `default_format`. The
/// `playlist_known` lookup lets the caller feed probe results in;
/// otherwise a URL shape heuristic decides the playlist hint.
pub fn build_descriptors<S, F>(
    lines: &[S],
    overrides: &HashMap<usize, MediaFormat>,
    default_format: MediaFormat,
    destination: &Path,
    playlist_known: F,
) -> BatchPlan
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<bool>,
{
    let mut plan = BatchPlan::default();

    for (index, raw) in lines.iter().enumerate() {
        let line = raw.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        let url = sanitize_url(line);
        if !is_valid_media_url(&url) {
            debug!("Rejected line {}: {}", index, line);
            plan.rejections.push(BatchRejection {
                index,
                input: line.to_string(),
                reason: format!("not a valid http(s) URL: {}", line),
            });
            continue;
        }

        let format = overrides.get(&index).copied().unwrap_or(default_format);
        let hint = match playlist_known(&url) {
            Some(known) => Some(known),
            None => looks_like_playlist(&url).then_some(true),
        };

        plan.descriptors.push(
            TaskDescriptor::new(url, format, destination.to_path_buf()).with_playlist_hint(hint),
        );
    }

    debug!(
        "Built batch plan: {} accepted, {} rejected",
        plan.descriptors.len(),
        plan.rejections.len()
    );
    plan
}
