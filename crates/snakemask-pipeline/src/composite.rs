//! Multi-label mask compositing.
//!
//! Polygons are grouped by label. Every polygon of a label is resampled
//! and relaxed (in parallel, they share nothing mutable), then filled
//! into that label's raster one after another in input order. The
//! label rasters are finally summed into one composite.
//!
//! With the default [`LabelPalette`] every code is a distinct bit, so
//! a composite pixel covered by several labels still tells which ones.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::point::Point as PixelPoint;
use rayon::prelude::*;
use serde::Serialize;

use crate::edge_field::VectorField;
use crate::elastic::OperatorCache;
use crate::relax::{self, RelaxParams};
use crate::resample;
use crate::types::{
    Contour, MIN_CONTOUR_POINTS, PixelSnap, Polygon, PolygonFailure, RefineConfig, RefineError,
};

/// Label names and the raster code each one is filled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelPalette {
    entries: Vec<(String, u8)>,
}

impl LabelPalette {
    /// Class names of the plant annotation tool, in palette order.
    pub const PLANT_LABELS: [&'static str; 6] =
        ["background", "flower", "peduncle", "stem", "leaf", "fruit"];

    /// A palette from `(label, code)` pairs. Labels are matched
    /// exactly; the first entry wins if a label repeats.
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, u8)>) -> Self {
        let mut kept: Vec<(String, u8)> = Vec::new();
        for (label, code) in entries {
            let label = label.into();
            if kept.iter().all(|(name, _)| *name != label) {
                kept.push((label, code));
            }
        }
        Self { entries: kept }
    }

    /// Plant classes with disjoint bit flags: `background` 0, then
    /// 1, 2, 4, 8, 16.
    #[must_use]
    pub fn bit_flags() -> Self {
        Self::new(
            Self::PLANT_LABELS
                .iter()
                .enumerate()
                .map(|(i, &label)| (label, if i == 0 { 0 } else { 1u8 << (i - 1) })),
        )
    }

    /// Plant classes spread over evenly spaced gray levels, for masks
    /// meant to be looked at.
    ///
    /// Overlapping labels sum to ambiguous values with this palette.
    #[must_use]
    pub fn gray_levels() -> Self {
        Self::new(
            Self::PLANT_LABELS
                .iter()
                .zip((0..=u8::MAX).step_by(51))
                .map(|(&label, code)| (label, code)),
        )
    }

    /// Raster code for `label`.
    #[must_use]
    pub fn code(&self, label: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|&(_, code)| code)
    }

    /// `(label, code)` pairs in palette order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.entries.iter().map(|(name, code)| (name.as_str(), *code))
    }

    /// Labels whose bit is set in a composite `value`.
    ///
    /// Only meaningful for bit-flag palettes; zero codes never match.
    #[must_use]
    pub fn decode(&self, value: u8) -> Vec<&str> {
        self.iter()
            .filter(|&(_, code)| code != 0 && value & code == code)
            .map(|(name, _)| name)
            .collect()
    }
}

impl Default for LabelPalette {
    fn default() -> Self {
        Self::bit_flags()
    }
}

/// One label's raster before summation.
#[derive(Debug, Clone)]
pub struct LabelMask {
    /// Label name.
    pub label: String,
    /// Code the label's polygons were filled with.
    pub code: u8,
    /// Filled polygons of this label only.
    pub mask: GrayImage,
}

/// What happened to one polygon that made it through relaxation.
#[derive(Debug, Clone, Serialize)]
pub struct RefinedContour {
    /// Polygon label.
    pub label: String,
    /// Position of the polygon in the input list.
    pub index: usize,
    /// Resampled contour before relaxation.
    pub initial: Contour,
    /// Contour after relaxation, clamped into the image.
    pub relaxed: Contour,
    /// Snapped contours recorded during relaxation.
    pub trajectory: Vec<Contour>,
    /// Point samples that fell outside the image and were clamped.
    pub clamped_samples: usize,
    /// Area enclosed by the relaxed contour.
    pub area: f64,
    /// Length of the relaxed contour's closed outline.
    pub perimeter: f64,
    /// Whether the contour covered enough distinct pixels to be filled.
    pub rasterized: bool,
}

/// Output of [`composite`].
#[derive(Debug)]
pub struct CompositeResult {
    /// Saturating per-pixel sum of all label rasters.
    pub mask: GrayImage,
    /// Label rasters, in palette order, for labels that had polygons.
    pub label_masks: Vec<LabelMask>,
    /// Per-polygon reports, in input order.
    pub contours: Vec<RefinedContour>,
    /// Polygons that could not be refined, in input order.
    pub failures: Vec<PolygonFailure>,
}

/// Refine every polygon against `field` and merge them into one mask.
///
/// Per-polygon problems (unknown label, too few points, singular
/// operator) are collected in [`CompositeResult::failures`] and do not
/// affect any other polygon or label.
#[must_use]
pub fn composite(
    field: &VectorField,
    polygons: &[Polygon],
    palette: &LabelPalette,
    config: &RefineConfig,
) -> CompositeResult {
    let dims = field.dimensions();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut failures = Vec::new();

    for (index, polygon) in polygons.iter().enumerate() {
        if palette.code(&polygon.label).is_some() {
            groups.entry(polygon.label.as_str()).or_default().push(index);
        } else {
            tracing::warn!(index, label = %polygon.label, "polygon label not in palette");
            failures.push(PolygonFailure {
                label: polygon.label.clone(),
                index,
                error: RefineError::UnknownLabel(polygon.label.clone()),
            });
        }
    }

    let params = RelaxParams {
        iterations: config.iterations,
        pixel_snap: config.pixel_snap,
        record_every: config.record_every,
    };
    let mut cache = OperatorCache::new(config.tension, config.rigidity, config.time_step);
    let mut mask = GrayImage::new(dims.width, dims.height);
    let mut label_masks = Vec::new();
    let mut contours = Vec::new();

    for (label, code) in palette.iter() {
        let Some(indices) = groups.get(label) else {
            continue;
        };

        // Operators come from the shared cache, so preparation is serial.
        let mut prepared = Vec::with_capacity(indices.len());
        for &index in indices {
            let initial = resample::resample_closed(&polygons[index].points, config.spacing);
            let operator = if initial.len() < MIN_CONTOUR_POINTS {
                Err(RefineError::TooFewPoints {
                    count: initial.len(),
                    minimum: MIN_CONTOUR_POINTS,
                })
            } else {
                cache.get(initial.len())
            };
            match operator {
                Ok(operator) => prepared.push((index, initial, operator)),
                Err(error) => {
                    tracing::warn!(index, label, %error, "skipping polygon");
                    failures.push(PolygonFailure {
                        label: label.to_string(),
                        index,
                        error,
                    });
                }
            }
        }

        let outcomes: Vec<_> = prepared
            .par_iter()
            .map(|(_, initial, operator)| relax::relax(initial, field, operator, params))
            .collect();

        let mut label_mask = GrayImage::new(dims.width, dims.height);
        for ((index, initial, _), outcome) in prepared.into_iter().zip(outcomes) {
            let relaxed = match outcome {
                Ok(relaxed) => relaxed,
                Err(error) => {
                    tracing::warn!(index, label, %error, "relaxation failed");
                    failures.push(PolygonFailure {
                        label: label.to_string(),
                        index,
                        error,
                    });
                    continue;
                }
            };
            if relaxed.clamped_samples > 0 {
                tracing::debug!(
                    index,
                    label,
                    clamped = relaxed.clamped_samples,
                    "contour samples clamped into the image"
                );
            }
            let rasterized =
                fill_contour(&mut label_mask, &relaxed.contour, code, config.pixel_snap);
            if !rasterized {
                tracing::warn!(index, label, "relaxed contour collapsed, nothing filled");
            }
            contours.push(RefinedContour {
                label: label.to_string(),
                index,
                area: relaxed.contour.area(),
                perimeter: resample::perimeter(relaxed.contour.points()),
                initial,
                relaxed: relaxed.contour,
                trajectory: relaxed.trajectory,
                clamped_samples: relaxed.clamped_samples,
                rasterized,
            });
        }

        add_saturating(&mut mask, &label_mask);
        tracing::debug!(label, code, polygons = indices.len(), "label raster finished");
        label_masks.push(LabelMask {
            label: label.to_string(),
            code,
            mask: label_mask,
        });
    }

    contours.sort_by_key(|c| c.index);
    failures.sort_by_key(|f| f.index);

    CompositeResult {
        mask,
        label_masks,
        contours,
        failures,
    }
}

/// Fill the polygon traced by `contour` with `code`.
///
/// Returns `false` when fewer than three distinct pixels remain after
/// snapping, in which case nothing is drawn.
pub fn fill_contour(mask: &mut GrayImage, contour: &Contour, code: u8, snap: PixelSnap) -> bool {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return false;
    }

    let mut vertices: Vec<PixelPoint<i32>> = Vec::with_capacity(contour.len());
    for p in contour.points() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let v = PixelPoint::new(snap.index(p.x, width) as i32, snap.index(p.y, height) as i32);
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    // The fill routine rejects an explicitly closed vertex list.
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return false;
    }

    imageproc::drawing::draw_polygon_mut(mask, &vertices, Luma([code]));
    true
}

fn add_saturating(total: &mut GrayImage, layer: &GrayImage) {
    for (dst, src) in total.pixels_mut().zip(layer.pixels()) {
        dst.0[0] = dst.0[0].saturating_add(src.0[0]);
    }
}
