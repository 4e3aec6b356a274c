//! snakemask-pipeline: active-contour refinement of polygon annotations
//! into multi-label segmentation masks (sans-IO).
//!
//! Rough, hand-drawn outlines are snapped onto nearby image edges:
//! excess-green index -> smoothed edge-force field -> per polygon
//! resample -> implicit elastic relaxation -> filled label rasters ->
//! summed composite mask.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and image buffers and returns structured data. All
//! filesystem interaction lives in `snakemask-cli`.

pub mod annotation;
pub mod blur;
pub mod composite;
pub mod edge_field;
pub mod elastic;
pub mod feature;
pub mod relax;
pub mod resample;
pub mod types;

pub use composite::{CompositeResult, LabelMask, LabelPalette, RefinedContour};
pub use edge_field::VectorField;
pub use elastic::{OperatorCache, RelaxationOperator};
pub use types::{
    ChannelOrder, Contour, Dimensions, GrayImage, PixelSnap, Point, Polygon, PolygonFailure,
    RefineConfig, RefineError, RgbImage,
};

/// Refine labeled polygons against a decoded color image.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Excess-green vegetation index, rescaled to 8 bits
/// 3. Edge-force field (17×17 Gaussian, Scharr, normalized gradient)
/// 4. Per label: resample, relax and fill every polygon
/// 5. Sum the label rasters into the composite mask
///
/// # Errors
///
/// Returns [`RefineError::InvalidConfig`] for an unusable `config` and
/// [`RefineError::DegenerateImage`] if a color channel is zero
/// everywhere. Problems with single polygons are not errors here; they
/// are collected in [`CompositeResult::failures`].
pub fn refine(
    image: &RgbImage,
    polygons: &[Polygon],
    palette: &LabelPalette,
    config: &RefineConfig,
) -> Result<CompositeResult, RefineError> {
    config.validate()?;

    let vegetation = feature::vegetation_image(image, config.channel_order)?;
    let field = edge_field::edge_field(&vegetation, config.sigma);
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        sigma = config.sigma,
        "edge field ready"
    );

    let result = composite::composite(&field, polygons, palette, config);
    tracing::info!(
        polygons = polygons.len(),
        refined = result.contours.len(),
        failed = result.failures.len(),
        "refinement finished"
    );
    Ok(result)
}

/// Decode an image and an annotation JSON document, then [`refine`].
///
/// # Errors
///
/// Returns [`RefineError::EmptyInput`] or [`RefineError::ImageDecode`]
/// for unusable image bytes, [`RefineError::Annotation`] for a
/// malformed document, and anything [`refine`] returns.
pub fn refine_bytes(
    image_bytes: &[u8],
    annotation_json: &str,
    palette: &LabelPalette,
    config: &RefineConfig,
) -> Result<CompositeResult, RefineError> {
    let image = feature::decode_rgb(image_bytes)?;
    let polygons = annotation::parse_json(annotation_json)?;
    refine(&image, &polygons, palette, config)
}

/// Encode a mask as an 8-bit grayscale PNG.
///
/// # Errors
///
/// Returns [`RefineError::ImageEncode`] if the encoder fails.
pub fn encode_png(mask: &GrayImage) -> Result<Vec<u8>, RefineError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        mask.as_raw(),
        mask.width(),
        mask.height(),
        image::ExtendedColorType::L8,
    )
    .map_err(|e| RefineError::ImageEncode(e.to_string()))?;
    Ok(buf)
}
