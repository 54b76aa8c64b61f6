//! Genome View
//!
//! In-memory model of the browser viewport and its bookmarks, exposed to the
//! model as the `builtin` capability source. Coordinates are 1-based and
//! inclusive; every move is clamped to the chromosome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::capability::{CapabilityError, CapabilitySource};
use sdk::types::{Parameters, ToolError, ToolInvocation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

/// Smallest span the view can zoom to
const MIN_SPAN: i64 = 10;

/// Largest coordinate magnitude accepted from a caller
const MAX_COORDINATE: i64 = 1 << 40;

const DEFAULT_ZOOM_FACTOR: f64 = 2.0;
const DEFAULT_SCROLL_FRACTION: f64 = 0.5;

/// Tools served by the genome view, with one-line descriptions
pub const GENOME_VIEW_TOOLS: &[(&str, &str)] = &[
    (
        "navigate_to",
        r#"Show a region. {"chromosome": "chr1", "start": 1000, "end": 2000} or {"locus": "chr1:1000-2000"}"#,
    ),
    ("zoom_in", r#"Zoom in around the view centre. {"factor": 2}"#),
    ("zoom_out", r#"Zoom out around the view centre. {"factor": 2}"#),
    (
        "scroll_left",
        r#"Move toward lower coordinates by a fraction of the view. {"fraction": 0.5}"#,
    ),
    (
        "scroll_right",
        r#"Move toward higher coordinates by a fraction of the view. {"fraction": 0.5}"#,
    ),
    ("get_current_state", "Report the visible region and bookmark count. {}"),
    (
        "create_bookmark",
        r#"Bookmark the visible region or a given one. {"name": "promoter"}"#,
    ),
    ("list_bookmarks", "List saved bookmarks. {}"),
    (
        "export_bookmarks",
        r#"Export bookmarks as BED or JSON text. {"format": "bed"}"#,
    ),
];

/// A visible genomic interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub chromosome: String,
    pub start: i64,
    pub end: i64,
}

impl Region {
    pub fn span(&self) -> i64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    pub region: Region,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ViewState {
    current: Region,
    bookmarks: Vec<Bookmark>,
}

/// Viewport over a fixed set of chromosomes
#[derive(Debug)]
pub struct GenomeView {
    chromosomes: BTreeMap<String, i64>,
    state: RwLock<ViewState>,
}

impl Default for GenomeView {
    /// GRCh38 primary chromosomes 1, 2, 7, 17 and X
    fn default() -> Self {
        Self::new([
            ("chr1", 248_956_422),
            ("chr2", 242_193_529),
            ("chr7", 159_345_973),
            ("chr17", 83_257_441),
            ("chrX", 156_040_895),
        ])
    }
}

impl GenomeView {
    /// Create a view over the given chromosome lengths, showing the first 10 kb
    /// of the first chromosome (by name order)
    pub fn new<I, S>(chromosomes: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let chromosomes: BTreeMap<String, i64> = chromosomes
            .into_iter()
            .map(|(name, length)| (name.into(), length.max(1)))
            .collect();

        let current = chromosomes
            .iter()
            .next()
            .map(|(name, length)| Region {
                chromosome: name.clone(),
                start: 1,
                end: (*length).min(10_000),
            })
            .unwrap_or(Region {
                chromosome: String::new(),
                start: 1,
                end: 1,
            });

        Self {
            chromosomes,
            state: RwLock::new(ViewState {
                current,
                bookmarks: Vec::new(),
            }),
        }
    }

    /// Visible region
    pub fn current(&self) -> Region {
        self.read_state(|state| state.current.clone())
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.read_state(|state| state.bookmarks.clone())
    }

    /// One-paragraph state summary sent to the model as domain context
    pub fn describe_state(&self) -> String {
        self.read_state(|state| {
            format!(
                "Visible region: {} ({} bp). Bookmarks: {}. Chromosomes: {}.",
                state.current,
                state.current.span(),
                state.bookmarks.len(),
                self.chromosomes
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    fn read_state<T>(&self, f: impl FnOnce(&ViewState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut ViewState) -> T) -> T {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn chromosome_length(&self, chromosome: &str) -> Result<i64, ToolError> {
        self.chromosomes.get(chromosome).copied().ok_or_else(|| {
            ToolError::InvalidParameter(format!(
                "unknown chromosome '{}'; available: {}",
                chromosome,
                self.chromosomes
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// Clamp an interval into the chromosome, keeping its span where possible
    fn clamp(&self, chromosome: &str, start: i64, end: i64) -> Result<Region, ToolError> {
        let length = self.chromosome_length(chromosome)?;
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let span = end.saturating_sub(start).saturating_add(1).clamp(1, length);

        let start = start.clamp(1, length - span + 1);
        Ok(Region {
            chromosome: chromosome.to_string(),
            start,
            end: start + span - 1,
        })
    }

    /// Show a region
    pub fn navigate(&self, chromosome: &str, start: Option<i64>, end: Option<i64>) -> Result<Region, ToolError> {
        let length = self.chromosome_length(chromosome)?;
        let current_span = self.current().span();
        let start = start.map(|v| check_coordinate("start", v)).transpose()?;
        let end = end.map(|v| check_coordinate("end", v)).transpose()?;

        let region = match (start, end) {
            (Some(start), Some(end)) => self.clamp(chromosome, start, end)?,
            (Some(start), None) => self.clamp(chromosome, start, start + current_span - 1)?,
            (None, _) => self.clamp(chromosome, 1, length)?,
        };

        self.write_state(|state| state.current = region.clone());
        Ok(region)
    }

    /// Zoom around the centre; `factor > 1` zooms in
    fn rescale(&self, factor: f64) -> Result<Region, ToolError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ToolError::InvalidParameter(
                "factor must be a positive number".to_string(),
            ));
        }

        let current = self.current();
        let length = self.chromosome_length(&current.chromosome)?;
        let centre = current.start + current.span() / 2;
        let span = ((current.span() as f64 / factor).round() as i64).clamp(MIN_SPAN.min(length), length);
        let start = centre - span / 2;

        let region = self.clamp(&current.chromosome, start, start + span - 1)?;
        self.write_state(|state| state.current = region.clone());
        Ok(region)
    }

    pub fn zoom_in(&self, factor: f64) -> Result<Region, ToolError> {
        self.rescale(factor)
    }

    pub fn zoom_out(&self, factor: f64) -> Result<Region, ToolError> {
        if factor <= 0.0 {
            return self.rescale(factor);
        }
        self.rescale(1.0 / factor)
    }

    /// Shift by a fraction of the span; negative moves left
    pub fn scroll(&self, fraction: f64) -> Result<Region, ToolError> {
        if !fraction.is_finite() {
            return Err(ToolError::InvalidParameter(
                "fraction must be a number".to_string(),
            ));
        }

        let current = self.current();
        let length = self.chromosome_length(&current.chromosome)?;
        let limit = length as f64 / current.span() as f64;
        let shift = (current.span() as f64 * fraction.clamp(-limit, limit)).round() as i64;
        let region = self.clamp(
            &current.chromosome,
            current.start + shift,
            current.end + shift,
        )?;
        self.write_state(|state| state.current = region.clone());
        Ok(region)
    }

    /// Bookmark a region (the visible one by default)
    pub fn create_bookmark(&self, name: Option<&str>, region: Option<Region>) -> Result<Bookmark, ToolError> {
        let region = match region {
            Some(r) => self.clamp(
                &r.chromosome,
                check_coordinate("start", r.start)?,
                check_coordinate("end", r.end)?,
            )?,
            None => self.current(),
        };
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| region.to_string());

        let bookmark = Bookmark {
            name,
            region,
            created_at: Utc::now(),
        };
        self.write_state(|state| state.bookmarks.push(bookmark.clone()));
        Ok(bookmark)
    }

    /// Bookmarks as BED (0-based, half-open) or a JSON array
    pub fn export_bookmarks(&self, format: &str) -> Result<String, ToolError> {
        let bookmarks = self.bookmarks();
        match format {
            "bed" => Ok(bookmarks
                .iter()
                .map(|b| {
                    format!(
                        "{}\t{}\t{}\t{}",
                        b.region.chromosome,
                        b.region.start - 1,
                        b.region.end,
                        b.name
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")),
            "json" => serde_json::to_string_pretty(&bookmarks)
                .map_err(|e| ToolError::InvalidParameter(e.to_string())),
            other => Err(ToolError::InvalidParameter(format!(
                "unsupported export format '{}'; use bed or json",
                other
            ))),
        }
    }

    /// Execute one genome-view tool
    pub fn call(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolError> {
        debug!("Genome view: {}", invocation.name);

        match invocation.name.as_str() {
            "navigate_to" => {
                let (chromosome, start, end) = match invocation.param_str_opt("locus") {
                    Some(locus) => parse_locus(locus)?,
                    None => (
                        invocation.param_str("chromosome")?.to_string(),
                        invocation.param_i64_opt("start"),
                        invocation.param_i64_opt("end"),
                    ),
                };
                let region = self.navigate(&chromosome, start, end)?;
                Ok(json!({ "region": region.to_string(), "span": region.span() }))
            }
            "zoom_in" | "zoom_out" => {
                let factor = invocation
                    .param_f64_opt("factor")
                    .unwrap_or(DEFAULT_ZOOM_FACTOR);
                let region = if invocation.name == "zoom_in" {
                    self.zoom_in(factor)?
                } else {
                    self.zoom_out(factor)?
                };
                Ok(json!({ "region": region.to_string(), "span": region.span() }))
            }
            "scroll_left" | "scroll_right" => {
                let fraction = invocation
                    .param_f64_opt("fraction")
                    .unwrap_or(DEFAULT_SCROLL_FRACTION)
                    .abs();
                let signed = if invocation.name == "scroll_left" {
                    -fraction
                } else {
                    fraction
                };
                let region = self.scroll(signed)?;
                Ok(json!({ "region": region.to_string(), "span": region.span() }))
            }
            "get_current_state" => {
                let current = self.current();
                Ok(json!({
                    "chromosome": current.chromosome,
                    "start": current.start,
                    "end": current.end,
                    "span": current.span(),
                    "bookmarks": self.bookmarks().len(),
                }))
            }
            "create_bookmark" => {
                let region = match invocation.param_str_opt("chromosome") {
                    Some(chromosome) => Some(Region {
                        chromosome: chromosome.to_string(),
                        start: invocation.param_i64("start")?,
                        end: invocation.param_i64("end")?,
                    }),
                    None => None,
                };
                let bookmark = self.create_bookmark(invocation.param_str_opt("name"), region)?;
                Ok(json!({ "name": bookmark.name, "region": bookmark.region.to_string() }))
            }
            "list_bookmarks" => {
                let bookmarks: Vec<serde_json::Value> = self
                    .bookmarks()
                    .iter()
                    .map(|b| json!({ "name": b.name, "region": b.region.to_string() }))
                    .collect();
                Ok(json!({ "bookmarks": bookmarks }))
            }
            "export_bookmarks" => {
                let format = invocation.param_str_opt("format").unwrap_or("bed");
                let content = self.export_bookmarks(&format.to_lowercase())?;
                Ok(json!({ "format": format, "count": self.bookmarks().len(), "content": content }))
            }
            other => Err(ToolError::UnknownMethod(other.to_string())),
        }
    }
}

fn check_coordinate(name: &str, value: i64) -> Result<i64, ToolError> {
    if value.unsigned_abs() > MAX_COORDINATE.unsigned_abs() {
        return Err(ToolError::InvalidParameter(format!(
            "{} {} is out of range",
            name, value
        )));
    }
    Ok(value)
}

/// Parse `chr1`, `chr1:1000` or `chr1:1,000-2,000`
pub fn parse_locus(locus: &str) -> Result<(String, Option<i64>, Option<i64>), ToolError> {
    let locus = locus.trim();
    let invalid = || ToolError::InvalidParameter(format!("invalid locus '{}'", locus));

    let Some((chromosome, range)) = locus.split_once(':') else {
        if locus.is_empty() {
            return Err(invalid());
        }
        return Ok((locus.to_string(), None, None));
    };

    let number = |s: &str| s.trim().replace(',', "").parse::<i64>().map_err(|_| invalid());

    match range.split_once('-') {
        Some((start, end)) => Ok((
            chromosome.to_string(),
            Some(number(start)?),
            Some(number(end)?),
        )),
        None => Ok((chromosome.to_string(), Some(number(range)?), None)),
    }
}

/// Capability source wrapping a shared genome view
pub struct BuiltinSource {
    view: std::sync::Arc<GenomeView>,
}

impl BuiltinSource {
    pub fn new(view: std::sync::Arc<GenomeView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl CapabilitySource for BuiltinSource {
    fn id(&self) -> &str {
        "builtin"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn list_names(&self) -> Vec<String> {
        GENOME_VIEW_TOOLS
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    async fn invoke(
        &self,
        name: &str,
        parameters: &Parameters,
    ) -> Result<serde_json::Value, CapabilityError> {
        let invocation = ToolInvocation::with_parameters(name, parameters.clone());
        match self.view.call(&invocation) {
            Ok(value) => Ok(value),
            Err(ToolError::UnknownMethod(name)) => Err(CapabilityError::Unresolved(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> Vec<(String, String)> {
        GENOME_VIEW_TOOLS
            .iter()
            .map(|(name, description)| (name.to_string(), description.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_view() -> GenomeView {
        GenomeView::new([("chr1", 1_000), ("chr2", 500)])
    }

    #[test]
    fn test_initial_region() {
        let view = small_view();
        assert_eq!(
            view.current(),
            Region {
                chromosome: "chr1".to_string(),
                start: 1,
                end: 1_000
            }
        );
    }

    #[test]
    fn test_navigate_clamps() {
        let view = small_view();
        let region = view.navigate("chr2", Some(450), Some(600)).unwrap();
        assert_eq!(region.to_string(), "chr2:350-500");
        assert_eq!(region.span(), 151);

        let region = view.navigate("chr1", Some(200), Some(100)).unwrap();
        assert_eq!(region.to_string(), "chr1:100-200");

        assert!(view.navigate("chr9", Some(1), Some(10)).is_err());
    }

    #[test]
    fn test_navigate_whole_chromosome() {
        let view = small_view();
        let region = view.navigate("chr2", None, None).unwrap();
        assert_eq!(region.to_string(), "chr2:1-500");
    }

    #[test]
    fn test_zoom() {
        let view = small_view();
        view.navigate("chr1", Some(1), Some(400)).unwrap();

        let region = view.zoom_in(2.0).unwrap();
        assert_eq!(region.span(), 200);
        assert_eq!(region.to_string(), "chr1:101-300");

        let region = view.zoom_out(2.0).unwrap();
        assert_eq!(region.span(), 400);

        let region = view.zoom_out(10.0).unwrap();
        assert_eq!(region.to_string(), "chr1:1-1000");

        assert!(view.zoom_in(0.0).is_err());
    }

    #[test]
    fn test_zoom_in_stops_at_min_span() {
        let view = small_view();
        view.navigate("chr1", Some(1), Some(20)).unwrap();
        let region = view.zoom_in(100.0).unwrap();
        assert_eq!(region.span(), MIN_SPAN);
    }

    #[test]
    fn test_scroll() {
        let view = small_view();
        view.navigate("chr1", Some(101), Some(200)).unwrap();

        assert_eq!(view.scroll(0.5).unwrap().to_string(), "chr1:151-250");
        assert_eq!(view.scroll(-1.0).unwrap().to_string(), "chr1:51-150");
        assert_eq!(view.scroll(-5.0).unwrap().to_string(), "chr1:1-100");
    }

    #[test]
    fn test_extreme_coordinates_rejected() {
        let view = small_view();
        let err = view.navigate("chr1", Some(i64::MIN), Some(i64::MAX)).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter(_)));
        assert!(view.navigate("chr1", Some(i64::MAX), None).is_err());
        assert!(view.navigate("chr1", Some(1), Some(i64::MIN)).is_err());

        let far = Region {
            chromosome: "chr1".to_string(),
            start: 1,
            end: i64::MAX,
        };
        assert!(view.create_bookmark(Some("far"), Some(far)).is_err());
        assert_eq!(view.current().to_string(), "chr1:1-1000");

        let region = view.navigate("chr2", Some(-50), Some(5_000)).unwrap();
        assert_eq!(region.to_string(), "chr2:1-500");
    }

    #[test]
    fn test_extreme_scroll_and_zoom_clamp() {
        let view = small_view();
        view.navigate("chr1", Some(101), Some(200)).unwrap();

        assert_eq!(view.scroll(1e30).unwrap().to_string(), "chr1:901-1000");
        assert_eq!(view.scroll(-1e30).unwrap().to_string(), "chr1:1-100");
        assert!(view.scroll(f64::NAN).is_err());

        assert_eq!(view.zoom_out(1e30).unwrap().to_string(), "chr1:1-1000");
        assert_eq!(view.zoom_in(1e30).unwrap().span(), MIN_SPAN);
    }

    #[tokio::test]
    async fn test_extreme_parameters_become_failures() {
        let source = BuiltinSource::new(std::sync::Arc::new(small_view()));

        let mut params = Parameters::new();
        params.insert("fraction".to_string(), json!(1e30));
        let value = source.invoke("scroll_right", &params).await.unwrap();
        assert_eq!(value["region"], "chr1:1-1000");

        let mut params = Parameters::new();
        params.insert("chromosome".to_string(), json!("chr1"));
        params.insert("start".to_string(), json!(i64::MIN));
        params.insert("end".to_string(), json!(i64::MAX));
        let err = source.invoke("navigate_to", &params).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));
    }

    #[test]
    fn test_parse_locus() {
        assert_eq!(
            parse_locus("chr1:1,000-2,000").unwrap(),
            ("chr1".to_string(), Some(1000), Some(2000))
        );
        assert_eq!(parse_locus("chrX").unwrap(), ("chrX".to_string(), None, None));
        assert_eq!(
            parse_locus("chr2:150").unwrap(),
            ("chr2".to_string(), Some(150), None)
        );
        assert!(parse_locus("chr1:abc-10").is_err());
        assert!(parse_locus("  ").is_err());
    }

    #[test]
    fn test_bookmarks_and_export() {
        let view = small_view();
        view.navigate("chr1", Some(11), Some(20)).unwrap();
        view.create_bookmark(Some("exon"), None).unwrap();
        let unnamed = view.create_bookmark(None, None).unwrap();
        assert_eq!(unnamed.name, "chr1:11-20");

        let bed = view.export_bookmarks("bed").unwrap();
        assert_eq!(bed.lines().next().unwrap(), "chr1\t10\t20\texon");
        assert_eq!(bed.lines().count(), 2);

        let exported: Vec<Bookmark> =
            serde_json::from_str(&view.export_bookmarks("json").unwrap()).unwrap();
        assert_eq!(exported.len(), 2);

        assert!(view.export_bookmarks("gff").is_err());
    }

    #[tokio::test]
    async fn test_builtin_source_dispatch() {
        let view = std::sync::Arc::new(small_view());
        let source = BuiltinSource::new(view.clone());
        assert_eq!(source.id(), "builtin");
        assert!(source.handles("navigate_to"));

        let mut params = Parameters::new();
        params.insert("locus".to_string(), json!("chr2:1-100"));
        let value = source.invoke("navigate_to", &params).await.unwrap();
        assert_eq!(value["region"], "chr2:1-100");
        assert_eq!(view.current().chromosome, "chr2");

        let err = source
            .invoke("navigate_to", &Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));

        let err = source.invoke("teleport", &Parameters::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unresolved(_)));
    }

    #[test]
    fn test_describe_state() {
        let view = small_view();
        let description = view.describe_state();
        assert!(description.contains("chr1:1-1000"));
        assert!(description.contains("Bookmarks: 0"));
    }
}
