use crate::canvas::{MapView, Overlay, PolygonLayer};
use crate::config::MarkerConfig;
use crate::data::{self, FeatureSource, LoadError};
use crate::types::{LatLng, Neighbourhood};
use serde::Serialize;
use std::f64::consts::PI;
use tracing::{debug, info};

const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;
// Leaflet's CRS always works in 256px units; tileSize/zoomOffset only change the request.
const CRS_TILE_SIZE: f64 = 256.0;

/// Cases per 1000 people, rounded to 4 decimals.
///
/// Population is not checked: zero gives `inf`, a missing value gives `NaN`.
pub fn per_capita(case_count: f64, population: f64) -> f64 {
    round_to(case_count / population * 1000.0, 4)
}

/// Round-half-up after nudging by `f64::EPSILON`, so 1.005 rounds to 1.01 at two places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    ((value + f64::EPSILON) * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    pub name: String,
    pub total_cases: f64,
    pub population: f64,
    pub per_capita: f64,
}

impl PopupContent {
    pub fn lines(&self) -> [String; 3] {
        [
            format!("Total COVID-19 Cases: {}", self.total_cases),
            format!("Population (2016 Census Data): {}", self.population),
            format!("Cases Per 1000 People (2016 Census Data): {}", self.per_capita),
        ]
    }

    pub fn to_html(&self) -> String {
        let mut html = format!("<h3>{}</h3>", escape_html(&self.name));
        for line in self.lines() {
            html.push_str("<p>");
            html.push_str(&line);
            html.push_str("</p>");
        }
        html
    }
}

/// Popup for a neighbourhood polygon, only when a case count is present.
pub fn popup_content(feature: &Neighbourhood) -> Option<PopupContent> {
    let total_cases = feature.case_count?;
    let population = feature.population.unwrap_or(f64::NAN);
    Some(PopupContent {
        name: feature.name.clone().unwrap_or_default(),
        total_cases,
        population,
        per_capita: per_capita(total_cases, population),
    })
}

#[derive(Debug, Clone)]
pub struct MarkerStyle {
    pub color: String,
    pub fill_opacity: f32,
}

impl From<&MarkerConfig> for MarkerStyle {
    fn from(config: &MarkerConfig) -> Self {
        Self {
            color: config.color.clone(),
            fill_opacity: config.fill_opacity,
        }
    }
}

/// Circle drawn at a neighbourhood centroid.
///
/// `radius` is the raw case count taken as metres. That is not a geographic
/// quantity, so circle sizes drift wildly between zoom levels; it is kept
/// as-is rather than normalised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub center: LatLng,
    pub radius: f64,
    pub color: String,
    pub fill_opacity: f32,
    pub interactive: bool,
}

impl MarkerSpec {
    /// On-screen radius at `zoom`, using the Web Mercator scale at the marker latitude.
    pub fn pixel_radius(&self, zoom: f64) -> f64 {
        let metres_per_pixel = EARTH_CIRCUMFERENCE_M * (self.center.lat * PI / 180.0).cos()
            / (CRS_TILE_SIZE * 2f64.powf(zoom));
        self.radius / metres_per_pixel
    }
}

/// No property guard here: a missing count or coordinate yields a NaN marker.
pub fn marker_spec(feature: &Neighbourhood, style: &MarkerStyle) -> MarkerSpec {
    MarkerSpec {
        center: feature.centroid,
        radius: feature.case_count.unwrap_or(f64::NAN),
        color: style.color.clone(),
        fill_opacity: style.fill_opacity,
        interactive: false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RenderSummary {
    pub features: usize,
    pub popups: usize,
    pub markers: usize,
}

/// Replaces every overlay on `map` with the layers for `features`.
///
/// Polygons go down first, markers on top, each in feature order.
pub fn render_overlays(
    map: &mut MapView,
    features: &[Neighbourhood],
    style: &MarkerStyle,
) -> RenderSummary {
    map.clear_overlays();

    let mut summary = RenderSummary {
        features: features.len(),
        ..Default::default()
    };

    for feature in features {
        let popup = popup_content(feature);
        if popup.is_none() {
            debug!("No case count for {:?}, polygon left without popup", feature.name);
        } else {
            summary.popups += 1;
        }
        map.add_overlay(Overlay::Polygon(PolygonLayer {
            name: feature.name.clone(),
            geometry: feature.geometry.clone(),
            popup,
        }));
    }

    for feature in features {
        map.add_overlay(Overlay::Circle(marker_spec(feature, style)));
        summary.markers += 1;
    }

    info!(
        "Rendered {} features ({} popups, {} markers)",
        summary.features, summary.popups, summary.markers
    );
    summary
}

/// Fetch then render. On a load error `map` is left untouched.
pub async fn populate(
    map: &mut MapView,
    source: &FeatureSource,
    style: &MarkerStyle,
) -> Result<RenderSummary, LoadError> {
    let features = data::load_features(source).await?;
    Ok(render_overlays(map, &features, style))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
