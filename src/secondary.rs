//! Picking recorded minigame footage to run under (or over) the primary video.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::concat::ConcatEntry;
use crate::error::{Error, Result};
use crate::probe::{MediaAsset, MediaKind};

const RECORDING_EXTENSIONS: [&str; 4] = ["avi", "mp4", "mkv", "mov"];
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSegment {
    pub path: PathBuf,
    pub duration: f64,
    pub outpoint: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecondaryPlan {
    pub segments: Vec<PlannedSegment>,
}

impl SecondaryPlan {
    pub fn total(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.outpoint.unwrap_or(s.duration))
            .sum()
    }

    pub fn entries(&self) -> Vec<ConcatEntry> {
        self.segments
            .iter()
            .map(|s| ConcatEntry {
                path: s.path.clone(),
                outpoint: s.outpoint,
            })
            .collect()
    }
}

/// Recordings in `dir`, oldest first by modification time.
pub fn list_recordings(dir: &Path) -> Result<Vec<MediaAsset>> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_video = path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
            RECORDING_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        });
        if !is_video || !path.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        found.push((modified, path));
    }
    found.sort();
    Ok(found
        .into_iter()
        .map(|(_, p)| MediaAsset::new(p, MediaKind::Video))
        .collect())
}

/// Walks `chronological` newest-first, skipping recordings shorter than
/// `min_segment`, until `target` seconds are covered. If the pool runs out,
/// the last selected recording is looped, finishing with a partial copy.
///
/// When no recording reaches `min_segment`, the minimum is ignored.
pub fn select_segments(
    chronological: &[MediaAsset],
    target: f64,
    min_segment: f64,
    mut duration_of: impl FnMut(&MediaAsset) -> Result<f64>,
) -> Result<SecondaryPlan> {
    let mut plan = SecondaryPlan::default();
    if target <= EPSILON || chronological.is_empty() {
        return Ok(plan);
    }

    let mut short = Vec::new();
    let mut total = 0.0;
    for asset in chronological.iter().rev() {
        let duration = duration_of(asset)?;
        if duration < min_segment {
            info!(
                "Skipping short recording {} ({:.2}s)",
                asset.path.display(),
                duration
            );
            short.push((asset, duration));
            continue;
        }
        plan.segments.push(PlannedSegment {
            path: asset.path.clone(),
            duration,
            outpoint: None,
        });
        total += duration;
        info!(
            "Added recording {} ({:.2}s), {:.2}s of {:.2}s covered",
            asset.path.display(),
            duration,
            total,
            target
        );
        if total + EPSILON >= target {
            return Ok(plan);
        }
    }

    if plan.segments.is_empty() {
        warn!("No recording reaches {:.2}s; using short recordings", min_segment);
        for (asset, duration) in short {
            plan.segments.push(PlannedSegment {
                path: asset.path.clone(),
                duration,
                outpoint: None,
            });
            total += duration;
            if total + EPSILON >= target {
                return Ok(plan);
            }
        }
    }

    let Some(last) = plan.segments.last().cloned() else {
        return Ok(plan);
    };
    let mut remaining = target - total;
    let mut loops = 0;
    while remaining > last.duration + EPSILON {
        plan.segments.push(last.clone());
        remaining -= last.duration;
        loops += 1;
    }
    if remaining > EPSILON {
        plan.segments.push(PlannedSegment {
            outpoint: Some(remaining),
            ..last.clone()
        });
        loops += 1;
    }
    info!(
        "Looped {} {} time(s) to cover {:.2}s",
        last.path.display(),
        loops,
        target
    );
    Ok(plan)
}

pub fn require_nonempty(plan: &SecondaryPlan, dir: &Path) -> Result<()> {
    if plan.segments.is_empty() {
        return Err(Error::Composition(format!(
            "no usable recordings in {}",
            dir.display()
        )));
    }
    Ok(())
}
