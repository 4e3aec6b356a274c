//! Polygon annotation input.
//!
//! Two formats are accepted:
//!
//! - the annotation tool's JSON document,
//!   `{"shapes": [{"label": "leaf", "points": [[x, y], ...]}, ...]}`,
//!   where any other keys are ignored;
//! - a plain-text outline with one whitespace-separated `x y` pair per
//!   line (`#` starts a comment), which holds a single unlabeled polygon.

use serde::Deserialize;

use crate::types::{Point, Polygon, RefineError};

#[derive(Deserialize)]
struct Document {
    shapes: Vec<Shape>,
}

#[derive(Deserialize)]
struct Shape {
    label: String,
    points: Vec<[f64; 2]>,
}

/// Parse an annotation JSON document into labeled polygons, in
/// document order.
///
/// # Errors
///
/// Returns [`RefineError::Annotation`] if the document is not valid
/// JSON or lacks the `shapes` list.
pub fn parse_json(json: &str) -> Result<Vec<Polygon>, RefineError> {
    let document: Document =
        serde_json::from_str(json).map_err(|e| RefineError::Annotation(e.to_string()))?;
    Ok(document
        .shapes
        .into_iter()
        .map(|shape| {
            Polygon::new(
                shape.label,
                shape.points.into_iter().map(|[x, y]| Point::new(x, y)).collect(),
            )
        })
        .collect())
}

/// Parse a plain-text outline and give it `label`.
///
/// # Errors
///
/// Returns [`RefineError::Annotation`] naming the first line that is
/// not exactly two finite numbers.
pub fn parse_text(text: &str, label: &str) -> Result<Polygon, RefineError> {
    let mut points = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let values: Vec<f64> = content
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|e| RefineError::Annotation(format!("line {}: {e}", number + 1)))?;
        match values[..] {
            [x, y] if x.is_finite() && y.is_finite() => points.push(Point::new(x, y)),
            _ => {
                return Err(RefineError::Annotation(format!(
                    "line {}: expected two finite numbers, got {content:?}",
                    number + 1
                )));
            }
        }
    }
    Ok(Polygon::new(label, points))
}
