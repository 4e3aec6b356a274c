//! snakemask: refine rough polygon annotations into segmentation masks.
//!
//! For every input image the annotation document is read (by default
//! `<stem>.json` next to the image), each polygon is snapped onto
//! nearby image edges, and the composite label mask is written as a
//! PNG. Optionally the per-polygon contours are written as JSON and
//! drawn over the source image for inspection.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin snakemask -- [OPTIONS] <IMAGES>...
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum};
use image::RgbaImage;
use serde::Serialize;
use snakemask_pipeline::{
    ChannelOrder, Contour, LabelPalette, PixelSnap, Polygon, PolygonFailure, RefineConfig,
    RefinedContour, RgbImage, annotation, feature,
};
use tiny_skia::{LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};
use tracing_subscriber::EnvFilter;

/// Snap polygon annotations onto image edges and write label masks.
///
/// Each image is processed independently; a failing image or polygon
/// is reported and the rest of the batch continues.
#[derive(Parser)]
#[command(name = "snakemask", version)]
struct Cli {
    /// Input images (PNG, JPEG, BMP, WebP).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Annotation file (single input image only).
    ///
    /// `.json` files are read as annotation documents, anything else as
    /// a plain `x y` outline labeled with `--text-label`. Defaults to
    /// `<stem>.json` next to each image.
    #[arg(long)]
    annotation: Option<PathBuf>,

    /// Label given to a plain-text outline.
    #[arg(long, default_value = "object")]
    text_label: String,

    /// Mask output path (single input image only).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for all outputs. Defaults to each image's directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Tension weight (first-difference stiffness).
    #[arg(long, default_value_t = RefineConfig::DEFAULT_TENSION)]
    tension: f64,

    /// Rigidity weight (second-difference stiffness).
    #[arg(long, default_value_t = RefineConfig::DEFAULT_RIGIDITY)]
    rigidity: f64,

    /// Implicit time step.
    #[arg(long, default_value_t = RefineConfig::DEFAULT_TIME_STEP)]
    time_step: f64,

    /// Target distance between contour points in pixels.
    #[arg(long, default_value_t = RefineConfig::DEFAULT_SPACING)]
    spacing: f64,

    /// Relaxation iterations per polygon.
    #[arg(long, default_value_t = RefineConfig::DEFAULT_ITERATIONS)]
    iterations: usize,

    /// Gaussian sigma for the edge field (0 derives it from the window).
    #[arg(long, default_value_t = RefineConfig::DEFAULT_SIGMA)]
    sigma: f32,

    /// Coordinate-to-pixel conversion when sampling and filling.
    #[arg(long, value_enum, default_value_t = Snap::Truncate)]
    pixel_snap: Snap,

    /// Record the contour every N iterations for `--trajectory`
    /// (0 records no snapshots; the report still holds each polygon's
    /// initial and relaxed contour).
    #[arg(long, default_value_t = 0)]
    record_every: usize,

    /// Label codes written into the mask.
    #[arg(long, value_enum, default_value_t = Palette::BitFlags)]
    palette: Palette,

    /// Full refinement config as a JSON string.
    ///
    /// When provided, all other refinement parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Also write `<stem>_trajectory.json` with every polygon's contours.
    #[arg(long)]
    trajectory: bool,

    /// Also write `<stem>_cont.png`: initial contours in blue, refined
    /// contours in red, over the source image.
    #[arg(long)]
    overlay: bool,

    /// Overlay stroke width in pixels.
    #[arg(long, default_value_t = 1.5)]
    line_width: f32,

    /// More log output (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

/// Pixel snapping selection.
#[derive(Clone, Copy, ValueEnum)]
enum Snap {
    /// Clamp and truncate (matches historical masks).
    Truncate,
    /// Clamp and round to the nearest pixel.
    Round,
}

/// Label palette selection.
#[derive(Clone, Copy, ValueEnum)]
enum Palette {
    /// Disjoint bit flags; overlaps stay recoverable.
    BitFlags,
    /// Evenly spaced gray levels, easier to look at.
    GrayLevels,
}

impl Palette {
    fn build(self) -> LabelPalette {
        match self {
            Self::BitFlags => LabelPalette::bit_flags(),
            Self::GrayLevels => LabelPalette::gray_levels(),
        }
    }
}

/// Build a [`RefineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<RefineConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        RefineConfig {
            tension: cli.tension,
            rigidity: cli.rigidity,
            time_step: cli.time_step,
            spacing: cli.spacing,
            iterations: cli.iterations,
            sigma: cli.sigma,
            pixel_snap: match cli.pixel_snap {
                Snap::Truncate => PixelSnap::Truncate,
                Snap::Round => PixelSnap::Round,
            },
            record_every: cli.record_every,
            ..RefineConfig::default()
        }
    };
    // Images decoded here are always RGB.
    config.channel_order = ChannelOrder::Rgb;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        ..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

/// Where one image's outputs go.
#[derive(Debug, PartialEq, Eq)]
struct Outputs {
    mask: PathBuf,
    trajectory: PathBuf,
    overlay: PathBuf,
}

impl Outputs {
    fn for_image(image: &Path, out_dir: Option<&Path>, mask: Option<&Path>) -> Self {
        let stem = image
            .file_stem()
            .map_or_else(|| "image".into(), |s| s.to_string_lossy());
        let dir = out_dir
            .or_else(|| image.parent())
            .unwrap_or_else(|| Path::new("."));
        Self {
            mask: mask.map_or_else(|| dir.join(format!("{stem}_mask.png")), Path::to_path_buf),
            trajectory: dir.join(format!("{stem}_trajectory.json")),
            overlay: dir.join(format!("{stem}_cont.png")),
        }
    }
}

/// Annotation file for `image`: the explicit one, or `<stem>.json`
/// beside it.
fn annotation_path(image: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| image.with_extension("json"), Path::to_path_buf)
}

fn load_polygons(path: &Path, text_label: &str) -> Result<Vec<Polygon>, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("reading {}: {e}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(annotation::parse_json(&text)?)
    } else {
        Ok(vec![annotation::parse_text(&text, text_label)?])
    }
}

/// Contents of `<stem>_trajectory.json`.
#[derive(Serialize)]
struct TrajectoryFile<'a> {
    image: String,
    config: &'a RefineConfig,
    contours: &'a [RefinedContour],
    failures: &'a [PolygonFailure],
}

// ---------------------------------------------------------------------------
// Overlay rendering via tiny-skia
// ---------------------------------------------------------------------------

/// Draw every polygon's initial (blue) and refined (red) contour over
/// `image`.
///
/// The source is opaque and strokes only blend over it, so the
/// premultiplied pixmap bytes are already straight RGBA.
fn render_overlay(
    image: &RgbImage,
    contours: &[RefinedContour],
    line_width: f32,
) -> Option<RgbaImage> {
    let (width, height) = image.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(image.pixels()) {
        dst.copy_from_slice(&[src[0], src[1], src[2], 255]);
    }

    let stroke = Stroke {
        width: line_width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    for refined in contours {
        stroke_contour(&mut pixmap, &refined.initial, [0, 0, 255], &stroke);
        stroke_contour(&mut pixmap, &refined.relaxed, [255, 0, 0], &stroke);
    }

    RgbaImage::from_raw(width, height, pixmap.take())
}

/// Stroke a closed contour. Points are pixel indices, so the path is
/// shifted onto pixel centers.
#[allow(clippy::cast_possible_truncation)]
fn stroke_contour(pixmap: &mut Pixmap, contour: &Contour, rgb: [u8; 3], stroke: &Stroke) {
    let points = contour.points();
    let mut pb = PathBuilder::new();
    if let Some(first) = points.first() {
        pb.move_to(first.x as f32, first.y as f32);
        for p in &points[1..] {
            pb.line_to(p.x as f32, p.y as f32);
        }
        pb.close();
    }
    let Some(path) = pb.finish() else {
        return;
    };

    let mut paint = Paint::default();
    paint.set_color_rgba8(rgb[0], rgb[1], rgb[2], 255);
    paint.anti_alias = true;
    pixmap.stroke_path(
        &path,
        &paint,
        stroke,
        Transform::from_translate(0.5, 0.5),
        None,
    );
}

// ---------------------------------------------------------------------------
// Per-image work
// ---------------------------------------------------------------------------

/// Refine one image and write its outputs. Returns the polygons that
/// could not be refined.
fn process_image(
    cli: &Cli,
    image_path: &Path,
    config: &RefineConfig,
    palette: &LabelPalette,
) -> Result<Vec<PolygonFailure>, Box<dyn Error>> {
    let bytes = std::fs::read(image_path)
        .map_err(|e| format!("reading {}: {e}", image_path.display()))?;
    let image = feature::decode_rgb(&bytes)?;
    let annotation_file = annotation_path(image_path, cli.annotation.as_deref());
    let polygons = load_polygons(&annotation_file, &cli.text_label)?;
    tracing::info!(
        width = image.width(),
        height = image.height(),
        polygons = polygons.len(),
        annotation = %annotation_file.display(),
        "refining"
    );

    let result = snakemask_pipeline::refine(&image, &polygons, palette, config)?;
    let outputs = Outputs::for_image(image_path, cli.out_dir.as_deref(), cli.output.as_deref());

    let png = snakemask_pipeline::encode_png(&result.mask)?;
    std::fs::write(&outputs.mask, &png)
        .map_err(|e| format!("writing {}: {e}", outputs.mask.display()))?;
    tracing::info!(path = %outputs.mask.display(), bytes = png.len(), "mask written");

    if cli.trajectory {
        let file = TrajectoryFile {
            image: image_path.display().to_string(),
            config,
            contours: &result.contours,
            failures: &result.failures,
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&outputs.trajectory, json)
            .map_err(|e| format!("writing {}: {e}", outputs.trajectory.display()))?;
        tracing::info!(path = %outputs.trajectory.display(), "trajectory written");
    }

    if cli.overlay {
        let overlay = render_overlay(&image, &result.contours, cli.line_width)
            .ok_or("overlay image could not be allocated")?;
        overlay.save(&outputs.overlay)?;
        tracing::info!(path = %outputs.overlay.display(), "overlay written");
    }

    Ok(result.failures)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if cli.images.len() > 1 && (cli.annotation.is_some() || cli.output.is_some()) {
        tracing::error!("--annotation and --output need exactly one input image");
        return ExitCode::FAILURE;
    }

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            tracing::error!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration");
    let palette = cli.palette.build();

    if let Some(ref dir) = cli.out_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        tracing::error!("creating {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    let mut failed_images = 0usize;
    let mut failed_polygons = 0usize;
    for image_path in &cli.images {
        let span = tracing::info_span!("image", path = %image_path.display());
        let _entered = span.enter();
        match process_image(&cli, image_path, &config, &palette) {
            Ok(failures) => {
                for failure in &failures {
                    tracing::warn!(
                        index = failure.index,
                        label = %failure.label,
                        error = %failure.error,
                        "polygon not refined"
                    );
                }
                failed_polygons += failures.len();
            }
            Err(e) => {
                tracing::error!("{e}");
                failed_images += 1;
            }
        }
    }

    tracing::info!(
        images = cli.images.len(),
        failed_images,
        failed_polygons,
        "done"
    );
    if failed_images > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use snakemask_pipeline::Point;

    #[test]
    fn default_outputs_sit_next_to_image() {
        let outputs = Outputs::for_image(Path::new("data/plant_01.jpg"), None, None);
        assert_eq!(outputs.mask, Path::new("data/plant_01_mask.png"));
        assert_eq!(outputs.trajectory, Path::new("data/plant_01_trajectory.json"));
        assert_eq!(outputs.overlay, Path::new("data/plant_01_cont.png"));
    }

    #[test]
    fn out_dir_and_explicit_mask_path() {
        let outputs = Outputs::for_image(
            Path::new("data/plant_01.jpg"),
            Some(Path::new("out")),
            Some(Path::new("gt.png")),
        );
        assert_eq!(outputs.mask, Path::new("gt.png"));
        assert_eq!(outputs.overlay, Path::new("out/plant_01_cont.png"));
    }

    #[test]
    fn annotation_defaults_to_json_beside_image() {
        assert_eq!(
            annotation_path(Path::new("data/plant_01.jpg"), None),
            Path::new("data/plant_01.json")
        );
        assert_eq!(
            annotation_path(Path::new("a.png"), Some(Path::new("b.txt"))),
            Path::new("b.txt")
        );
    }

    #[test]
    fn config_from_flags() {
        let cli = Cli::try_parse_from([
            "snakemask",
            "a.png",
            "--iterations",
            "5",
            "--pixel-snap",
            "round",
        ])
        .unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.iterations, 5);
        assert_eq!(config.pixel_snap, PixelSnap::Round);
        assert!((config.tension - RefineConfig::DEFAULT_TENSION).abs() < f64::EPSILON);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::try_parse_from([
            "snakemask",
            "a.png",
            "--iterations",
            "5",
            "--config-json",
            r#"{"iterations": 7, "spacing": 2.0}"#,
        ])
        .unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.iterations, 7);
        assert!((config.spacing - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cli = Cli::try_parse_from(["snakemask", "a.png", "--spacing", "0"]).unwrap();
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn overlay_draws_both_contours() {
        let image = RgbImage::from_pixel(40, 40, image::Rgb([0, 0, 0]));
        let square = |lo: f64, hi: f64| {
            Contour::new(vec![
                Point::new(lo, lo),
                Point::new(hi, lo),
                Point::new(hi, hi),
                Point::new(lo, hi),
            ])
        };
        let refined = RefinedContour {
            label: "leaf".to_string(),
            index: 0,
            initial: square(5.0, 35.0),
            relaxed: square(12.0, 28.0),
            trajectory: Vec::new(),
            clamped_samples: 0,
            area: 256.0,
            perimeter: 64.0,
            rasterized: true,
        };
        let overlay = render_overlay(&image, &[refined], 2.0).unwrap();
        assert_eq!(overlay.dimensions(), (40, 40));
        assert!(overlay.get_pixel(20, 5).0[2] > 128, "blue initial contour");
        assert!(overlay.get_pixel(20, 12).0[0] > 128, "red refined contour");
        assert_eq!(overlay.get_pixel(20, 20).0, [0, 0, 0, 255]);
    }
}
