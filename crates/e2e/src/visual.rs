//! Screenshot comparison against stored baselines

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated before a pixel counts as changed
const TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Written only when some pixels differ
    pub diff_image_path: Option<PathBuf>,

    pub actual_hash: String,
    pub baseline_hash: String,
}

impl VisualDiff {
    fn identical(hash: String, total_pixels: u64) -> Self {
        Self {
            matches: true,
            diff_percent: 0.0,
            diff_pixels: 0,
            total_pixels,
            diff_image_path: None,
            actual_hash: hash.clone(),
            baseline_hash: hash,
        }
    }
}

/// Compares captured PNGs with the baseline of the same name
#[derive(Debug, Clone)]
pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.actual_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Store `png` as the actual capture for `name` and compare it with the baseline.
    pub fn compare(&self, name: &str, png: &[u8], threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let actual_path = self.actual_path(name);
        let baseline_path = self.baseline_path(name);

        std::fs::write(&actual_path, png)?;
        let actual_hash = hash_bytes(png);

        if !baseline_path.exists() {
            if !self.config.auto_update {
                return Err(E2eError::BaselineNotFound(
                    baseline_path.to_string_lossy().to_string(),
                ));
            }
            info!("Creating baseline for '{}' (auto-update enabled)", name);
            std::fs::write(&baseline_path, png)?;
            return Ok(VisualDiff::identical(actual_hash, 0));
        }

        let baseline_bytes = std::fs::read(&baseline_path)?;
        let baseline_hash = hash_bytes(&baseline_bytes);
        let actual_img = image::load_from_memory(png)?;
        let (width, height) = actual_img.dimensions();
        let total_pixels = width as u64 * height as u64;

        if actual_hash == baseline_hash {
            debug!("'{}' matches baseline exactly (same hash)", name);
            return Ok(VisualDiff::identical(actual_hash, total_pixels));
        }

        let baseline_img = image::load_from_memory(&baseline_bytes)?;
        if actual_img.dimensions() != baseline_img.dimensions() {
            warn!(
                "'{}' dimensions differ: actual {:?} vs baseline {:?}",
                name,
                actual_img.dimensions(),
                baseline_img.dimensions()
            );
        }

        let actual_rgba = actual_img.to_rgba8();
        let baseline_rgba = baseline_img.to_rgba8();
        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let actual_pixel = actual_rgba.get_pixel(x, y);
                let differs = if x < baseline_rgba.width() && y < baseline_rgba.height() {
                    pixels_differ(actual_pixel, baseline_rgba.get_pixel(x, y))
                } else {
                    true
                };

                if differs {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                } else {
                    let c = actual_pixel.channels();
                    diff_img.put_pixel(x, y, image::Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                }
            }
        }

        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            diff_pixels as f64 / total_pixels as f64 * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff_pixels > 0 {
            let path = self.config.diff_dir.join(format!("{}-diff.png", name));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual regression in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, threshold
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        })
    }

    /// Promote the last actual capture of `name` to baseline
    pub fn update_baseline(&self, name: &str) -> E2eResult<()> {
        let actual_path = self.actual_path(name);
        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Cannot update baseline: actual screenshot not found: {}",
                actual_path.display()
            )));
        }
        std::fs::copy(&actual_path, self.baseline_path(name))?;
        info!("Updated baseline for '{}'", name);
        Ok(())
    }

    fn actual_path(&self, name: &str) -> PathBuf {
        self.config.actual_dir.join(format!("{}.png", name))
    }

    fn baseline_path(&self, name: &str) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", name))
    }
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > TOLERANCE)
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Configuration for visual testing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,
    /// Allowed share of differing pixels, in percent
    pub threshold: f64,
    /// Create missing baselines from the first capture
    pub auto_update: bool,
}

impl VisualConfig {
    /// All three directories under one root
    pub fn rooted(root: &Path) -> Self {
        Self {
            baseline_dir: root.join("baselines"),
            actual_dir: root.join("screenshots"),
            diff_dir: root.join("diffs"),
            ..Self::default()
        }
    }
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("test-results/baselines"),
            actual_dir: PathBuf::from("test-results/screenshots"),
            diff_dir: PathBuf::from("test-results/diffs"),
            threshold: 0.5,
            auto_update: false,
        }
    }
}
