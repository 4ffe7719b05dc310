//! Normalized inference results.
//!
//! The inference service does not version its response schema, so
//! [`normalize`] extracts every field on its own and falls back to `None` on
//! absence or type mismatch instead of rejecting the payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix used when the service returns an inline base64 PNG overlay.
const INLINE_PNG_PREFIX: &str = "data:image/png;base64,";

/// Typed analysis output stored on a completed record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Service-side analysis id.
    pub id: Option<String>,
    /// Short human-readable summary.
    pub summary: Option<String>,
    /// Model confidence. Usually in `[0, 1]` but passed through unchecked.
    pub confidence: Option<f64>,
    /// Service-defined score.
    pub score: Option<f64>,
    /// Peak per-pixel confidence, when the service reports one.
    pub max_confidence: Option<f64>,
    /// Overall severity classification, e.g. `"Low"` or `"High"`.
    pub severity: Option<String>,
    /// URL of an overlay image highlighting detections.
    pub overlay_url: Option<String>,
    /// Individual detections.
    pub findings: Vec<Finding>,
    /// Physical crack measurements, when the service reports them.
    pub measurements: Option<Measurements>,
}

/// One detected feature, such as a crack segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Where on the airframe.
    pub area: Option<String>,
    /// Detection class.
    pub label: Option<String>,
    /// Severity as reported by the service.
    pub severity: Option<String>,
    /// Number of instances.
    pub count: Option<u64>,
    /// Per-finding confidence.
    pub confidence: Option<f64>,
    /// Free-form description.
    pub description: Option<String>,
}

/// Crack quantification figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    /// Share of the image covered by crack pixels, in percent.
    pub coverage_pct: Option<f64>,
    /// Skeleton length in millimetres.
    pub length_mm: Option<f64>,
    /// Maximum crack width in millimetres.
    pub max_width_mm: Option<f64>,
    /// Mean crack width in millimetres.
    pub mean_width_mm: Option<f64>,
}

impl Measurements {
    fn is_empty(&self) -> bool {
        self.coverage_pct.is_none()
            && self.length_mm.is_none()
            && self.max_width_mm.is_none()
            && self.mean_width_mm.is_none()
    }
}

/// Turn an arbitrary inference payload into an [`AnalysisResult`].
///
/// Never panics. The analysis body is taken from `payload.analysis` when that
/// is an object, otherwise from the payload itself. Anything that is not an
/// object yields an all-empty result.
#[must_use]
pub fn normalize(payload: &Value) -> AnalysisResult {
    let Some(root) = analysis_root(payload) else {
        return AnalysisResult::default();
    };
    let metrics = root.get("metrics").and_then(Value::as_object);

    AnalysisResult {
        id: string_field(root, "id"),
        summary: string_field(root, "summary"),
        confidence: metrics
            .and_then(|m| number_field(m, "confidence"))
            .or_else(|| number_field(root, "confidence"))
            .or_else(|| number_field(root, "avg_confidence")),
        score: metrics
            .and_then(|m| number_field(m, "score"))
            .or_else(|| number_field(root, "score")),
        max_confidence: metrics
            .and_then(|m| number_field(m, "maxConfidence"))
            .or_else(|| number_field(root, "maxConfidence"))
            .or_else(|| number_field(root, "max_confidence")),
        severity: string_field(root, "severity"),
        overlay_url: overlay_url(root),
        findings: findings(root.get("findings")),
        measurements: measurements(root),
    }
}

fn analysis_root(payload: &Value) -> Option<&Map<String, Value>> {
    let top = payload.as_object()?;
    match top.get("analysis").and_then(Value::as_object) {
        Some(analysis) => Some(analysis),
        None => Some(top),
    }
}

fn overlay_url(root: &Map<String, Value>) -> Option<String> {
    string_field(root, "overlayUrl")
        .or_else(|| string_field(root, "overlay_url"))
        .or_else(|| {
            root.get("overlay_image_b64")
                .and_then(Value::as_str)
                .filter(|b64| !b64.is_empty())
                .map(|b64| format!("{INLINE_PNG_PREFIX}{b64}"))
        })
}

fn findings(value: Option<&Value>) -> Vec<Finding> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Finding {
            area: string_field(item, "area"),
            label: string_field(item, "label"),
            severity: string_field(item, "severity"),
            count: item.get("count").and_then(Value::as_u64),
            confidence: number_field(item, "confidence"),
            description: string_field(item, "description"),
        })
        .collect()
}

fn measurements(root: &Map<String, Value>) -> Option<Measurements> {
    let nested = root.get("measurements").and_then(Value::as_object);
    // Flat shape emitted by the crack-segmentation backend.
    let quant = root.get("quantification").and_then(Value::as_object);
    let field = |camel: &str, snake: &str| {
        nested
            .and_then(|m| number_field(m, camel))
            .or_else(|| quant.and_then(|q| number_field(q, snake)))
    };

    let found = Measurements {
        coverage_pct: nested
            .and_then(|m| number_field(m, "coveragePct"))
            .or_else(|| number_field(root, "crack_coverage_pct")),
        length_mm: field("lengthMm", "length_mm"),
        max_width_mm: field("maxWidthMm", "max_width_mm"),
        mean_width_mm: field("meanWidthMm", "mean_width_mm"),
    };
    (!found.is_empty()).then_some(found)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}
