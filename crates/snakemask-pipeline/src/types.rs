//! Shared types for the snakemask refinement pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference label and
/// composite masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can pass decoded color
/// images without depending on `image` directly.
pub use image::RgbImage;

/// A single-channel real-valued raster (vegetation index, smoothed
/// intermediates).
pub type ScalarField = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Smallest contour size the elastic operator can build its
/// five-entry stencil for.
pub const MIN_CONTOUR_POINTS: usize = 5;

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A manually drawn outline with its semantic label.
///
/// The point list may be open or closed (first point repeated at the
/// end); it is only read, never mutated, by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Semantic class, e.g. `"leaf"`.
    pub label: String,
    /// Outline vertices in image pixel space.
    pub points: Vec<Point>,
}

impl Polygon {
    /// Create a labeled polygon.
    #[must_use]
    pub fn new(label: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }
}

/// A closed loop of points: point 0 is adjacent to point `len - 1`.
///
/// The closing point is never stored twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour(Vec<Point>);

impl Contour {
    /// Create a contour from its loop points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of points in the loop.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the contour and returns the underlying points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Enclosed area (shoelace formula), always non-negative.
    #[must_use]
    pub fn area(&self) -> f64 {
        use geo::Area;
        self.to_geo().unsigned_area()
    }

    /// Area-weighted centroid, or `None` for an empty contour.
    #[must_use]
    pub fn centroid(&self) -> Option<Point> {
        use geo::Centroid;
        self.to_geo().centroid().map(|c| Point::new(c.x(), c.y()))
    }

    fn to_geo(&self) -> geo::Polygon<f64> {
        let ring: Vec<(f64, f64)> = self.0.iter().map(|p| (p.x, p.y)).collect();
        geo::Polygon::new(geo::LineString::from(ring), vec![])
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Storage order of the three color channels of a decoded image.
///
/// The vegetation index needs to know which channel is green; the
/// order is tracked explicitly rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Red, green, blue (what the `image` crate decodes to).
    #[default]
    Rgb,
    /// Blue, green, red (OpenCV-style buffers).
    Bgr,
}

impl ChannelOrder {
    /// Index of the green channel within a pixel.
    #[must_use]
    pub const fn green_index(self) -> usize {
        match self {
            Self::Rgb | Self::Bgr => 1,
        }
    }

    /// Channel names in storage order, for error messages.
    #[must_use]
    pub const fn names(self) -> [&'static str; 3] {
        match self {
            Self::Rgb => ["red", "green", "blue"],
            Self::Bgr => ["blue", "green", "red"],
        }
    }
}

/// How real-valued contour coordinates are turned into pixel indices
/// when sampling the force field and when rasterizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelSnap {
    /// Clamp, then truncate toward zero. Matches the reference masks.
    #[default]
    Truncate,
    /// Clamp, then round to the nearest pixel. Opt-in behavior change.
    Round,
}

impl PixelSnap {
    /// Clamp `value` to `[0, extent - 1]` and convert to an index.
    ///
    /// `extent` must be non-zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn index(self, value: f64, extent: u32) -> usize {
        let upper = f64::from(extent.saturating_sub(1));
        let clamped = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, upper)
        };
        match self {
            Self::Truncate => clamped as usize,
            Self::Round => clamped.round() as usize,
        }
    }
}

/// Parameters for one refinement run.
///
/// No default is valid for every image: callers are expected to tune
/// per dataset. The defaults are the annotation tool's historical
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Tension weight α (first-difference stiffness).
    pub tension: f64,
    /// Rigidity weight β (second-difference stiffness).
    pub rigidity: f64,
    /// Implicit time step τ.
    pub time_step: f64,
    /// Target distance between resampled contour points, in pixels.
    pub spacing: f64,
    /// Number of relaxation iterations K.
    pub iterations: usize,
    /// Gaussian smoothing σ for the edge field.
    pub sigma: f32,
    /// Channel order of the color image handed to the pipeline.
    pub channel_order: ChannelOrder,
    /// Coordinate-to-pixel conversion for sampling and rasterizing.
    pub pixel_snap: PixelSnap,
    /// Record the contour every `record_every` iterations (0 disables).
    pub record_every: usize,
}

impl RefineConfig {
    /// Default tension weight α.
    pub const DEFAULT_TENSION: f64 = 0.01;
    /// Default rigidity weight β.
    pub const DEFAULT_RIGIDITY: f64 = 0.0001;
    /// Default time step τ.
    pub const DEFAULT_TIME_STEP: f64 = 10.0;
    /// Default resampling spacing.
    pub const DEFAULT_SPACING: f64 = 1.0;
    /// Default iteration budget.
    pub const DEFAULT_ITERATIONS: usize = 1000;
    /// Default edge-field smoothing σ.
    pub const DEFAULT_SIGMA: f32 = 3.0;

    /// Check that every numeric parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::InvalidConfig`] for non-finite weights,
    /// a non-positive spacing, or a negative sigma.
    pub fn validate(&self) -> Result<(), RefineError> {
        for (name, value) in [
            ("tension", self.tension),
            ("rigidity", self.rigidity),
            ("time_step", self.time_step),
            ("spacing", self.spacing),
            ("sigma", f64::from(self.sigma)),
        ] {
            if !value.is_finite() {
                return Err(RefineError::InvalidConfig(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if self.spacing <= 0.0 {
            return Err(RefineError::InvalidConfig(format!(
                "spacing must be positive, got {}",
                self.spacing
            )));
        }
        if self.sigma < 0.0 {
            return Err(RefineError::InvalidConfig(format!(
                "sigma must not be negative, got {}",
                self.sigma
            )));
        }
        Ok(())
    }
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            tension: Self::DEFAULT_TENSION,
            rigidity: Self::DEFAULT_RIGIDITY,
            time_step: Self::DEFAULT_TIME_STEP,
            spacing: Self::DEFAULT_SPACING,
            iterations: Self::DEFAULT_ITERATIONS,
            sigma: Self::DEFAULT_SIGMA,
            channel_order: ChannelOrder::default(),
            pixel_snap: PixelSnap::default(),
            record_every: 0,
        }
    }
}

/// Errors that can occur during refinement.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Failed to encode an output raster.
    #[error("failed to encode image: {0}")]
    ImageEncode(String),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Refinement configuration is invalid.
    #[error("invalid refinement configuration: {0}")]
    InvalidConfig(String),

    /// The annotation document could not be parsed.
    #[error("invalid annotation: {0}")]
    Annotation(String),

    /// A color channel is zero everywhere, so it cannot be normalized.
    #[error("degenerate image: {channel} channel is zero everywhere")]
    DegenerateImage {
        /// Name of the all-zero channel.
        channel: &'static str,
    },

    /// A contour has too few points for the elastic stencil.
    #[error("contour too short to regularize: {count} points, need at least {minimum}")]
    TooFewPoints {
        /// Points in the offending contour.
        count: usize,
        /// Required minimum.
        minimum: usize,
    },

    /// `I + τA` is not invertible for these parameters.
    #[error(
        "relaxation operator is singular (tension={tension}, rigidity={rigidity}, \
         time_step={time_step}, size={size})"
    )]
    SingularOperator {
        /// Tension weight α.
        tension: f64,
        /// Rigidity weight β.
        rigidity: f64,
        /// Time step τ.
        time_step: f64,
        /// Contour size N.
        size: usize,
    },

    /// A polygon carries a label the palette has no code for.
    #[error("unknown label {0:?}")]
    UnknownLabel(String),
}

/// Serde-compatible proxy for `RefineError`.
///
/// `image::ImageError` does not implement serde, so the `ImageDecode`
/// variant stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum RefineErrorProxy {
    ImageDecode(String),
    ImageEncode(String),
    EmptyInput,
    InvalidConfig(String),
    Annotation(String),
    DegenerateImage {
        channel: String,
    },
    TooFewPoints {
        count: usize,
        minimum: usize,
    },
    SingularOperator {
        tension: f64,
        rigidity: f64,
        time_step: f64,
        size: usize,
    },
    UnknownLabel(String),
}

impl Serialize for RefineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => RefineErrorProxy::ImageDecode(e.to_string()),
            Self::ImageEncode(s) => RefineErrorProxy::ImageEncode(s.clone()),
            Self::EmptyInput => RefineErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => RefineErrorProxy::InvalidConfig(s.clone()),
            Self::Annotation(s) => RefineErrorProxy::Annotation(s.clone()),
            Self::DegenerateImage { channel } => RefineErrorProxy::DegenerateImage {
                channel: (*channel).to_string(),
            },
            Self::TooFewPoints { count, minimum } => RefineErrorProxy::TooFewPoints {
                count: *count,
                minimum: *minimum,
            },
            Self::SingularOperator {
                tension,
                rigidity,
                time_step,
                size,
            } => RefineErrorProxy::SingularOperator {
                tension: *tension,
                rigidity: *rigidity,
                time_step: *time_step,
                size: *size,
            },
            Self::UnknownLabel(s) => RefineErrorProxy::UnknownLabel(s.clone()),        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RefineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = RefineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image error cannot be rebuilt; keep its message.
            RefineErrorProxy::ImageDecode(msg) => {
                Self::InvalidConfig(format!("image decode error: {msg}"))
            }
            RefineErrorProxy::ImageEncode(s) => Self::ImageEncode(s),
            RefineErrorProxy::EmptyInput => Self::EmptyInput,
            RefineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            RefineErrorProxy::Annotation(s) => Self::Annotation(s),
            RefineErrorProxy::DegenerateImage { channel } => Self::DegenerateImage {
                channel: static_channel_name(&channel),
            },
            RefineErrorProxy::TooFewPoints { count, minimum } => {
                Self::TooFewPoints { count, minimum }
            }
            RefineErrorProxy::SingularOperator {
                tension,
                rigidity,
                time_step,
                size,
            } => Self::SingularOperator {
                tension,
                rigidity,
                time_step,
                size,
            },
            RefineErrorProxy::UnknownLabel(s) => Self::UnknownLabel(s),        })
    }
}

fn static_channel_name(name: &str) -> &'static str {
    match name {
        "red" => "red",
        "green" => "green",
        "blue" => "blue",
        _ => "unknown",
    }
}

/// A polygon that could not be turned into mask pixels.
///
/// Failures are local to one polygon; the rest of the composite is
/// still built.
#[derive(Debug, Serialize, Deserialize)]
pub struct PolygonFailure {
    /// Label of the failed polygon.
    pub label: String,
    /// Position of the polygon in the input list.
    pub index: usize,
    /// What went wrong.
    pub error: RefineError,
}
