//! Score-to-path policy.

use dumdoors_core::config::{GameConfig, PathConfig, ThresholdConfig};
use dumdoors_core::model::{PathBand, PathLength, PathRecommendation};

/// Band for `score`: at or below `poor_max` is poor, at or above
/// `excellent_min` is excellent.
#[must_use]
pub fn band_for(score: u8, thresholds: &ThresholdConfig) -> PathBand {
    if score <= thresholds.poor_max {
        PathBand::Poor
    } else if score >= thresholds.excellent_min {
        PathBand::Excellent
    } else {
        PathBand::Average
    }
}

fn length_for(band: PathBand) -> PathLength {
    match band {
        PathBand::Poor => PathLength::Longer,
        PathBand::Average => PathLength::Medium,
        PathBand::Excellent => PathLength::Shorter,
    }
}

/// `floor(default × factor)` for the length, clamped to the node bounds.
#[must_use]
pub fn node_count(length: PathLength, path: &PathConfig) -> u32 {
    let factor = match length {
        PathLength::Longer => path.longer_factor,
        PathLength::Medium => 1.0,
        PathLength::Shorter => path.shorter_factor,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let raw = (f64::from(path.default_nodes) * factor)
        .floor()
        .clamp(0.0, f64::from(u32::MAX)) as u32;
    raw.clamp(path.min_nodes, path.max_nodes)
}

/// The routing decision for `score` under `config`.
#[must_use]
pub fn recommend(score: u8, config: &GameConfig) -> PathRecommendation {
    let band = band_for(score, &config.thresholds);
    let length = length_for(band);
    PathRecommendation {
        band,
        length,
        node_count: node_count(length, &config.path),
    }
}
