//! The map canvas: an owned view with one base tile layer and the overlays
//! drawn on top of it.

use crate::config::{MapConfig, TileConfig};
use crate::overlay::{MarkerSpec, PopupContent};
use crate::types::LatLng;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

/// Remote raster tiles used as the base layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayer {
    pub url_template: String,
    pub style_id: String,
    pub tile_size: u32,
    pub zoom_offset: i32,
    pub access_token: String,
    pub attribution: String,
}

impl TileLayer {
    pub fn from_config(config: &TileConfig) -> Self {
        Self {
            url_template: config.url_template.clone(),
            style_id: config.style_id.clone(),
            tile_size: config.tile_size,
            zoom_offset: config.zoom_offset,
            access_token: config.access_token.clone(),
            attribution: config.attribution.clone(),
        }
    }

    /// Zoom level actually requested from the provider for a given view zoom.
    pub fn request_zoom(&self, view_zoom: f64) -> u8 {
        let z = view_zoom.round() as i64 + self.zoom_offset as i64;
        z.clamp(0, u8::MAX as i64) as u8
    }

    pub fn tile_url(&self, z: u8, x: u32, y: u32) -> String {
        self.url_template
            .replace("{id}", &self.style_id)
            .replace("{tileSize}", &self.tile_size.to_string())
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{accessToken}", &self.access_token)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolygonLayer {
    pub name: Option<String>,
    #[serde(skip)]
    pub geometry: Option<MultiPolygon<f64>>,
    pub popup: Option<PopupContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Polygon(PolygonLayer),
    Circle(MarkerSpec),
}

#[derive(Debug, Clone)]
pub struct MapView {
    center: LatLng,
    zoom: f64,
    min_zoom: f64,
    max_zoom: f64,
    base: TileLayer,
    overlays: Vec<Overlay>,
}

impl MapView {
    pub fn new(map: &MapConfig, tiles: &TileConfig) -> Self {
        let mut view = Self {
            center: LatLng::from(map.center),
            zoom: map.zoom,
            min_zoom: map.min_zoom,
            max_zoom: map.max_zoom,
            base: TileLayer::from_config(tiles),
            overlays: Vec::new(),
        };
        view.set_zoom(map.zoom);
        view
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn base_layer(&self) -> &TileLayer {
        &self.base
    }

    pub fn set_view(&mut self, center: LatLng, zoom: f64) {
        self.pan_to(center);
        self.set_zoom(zoom);
    }

    pub fn pan_to(&mut self, center: LatLng) {
        self.center = center;
    }

    /// Clamps into `[min_zoom, max_zoom]`; never panics on odd bounds.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.max(self.min_zoom).min(self.max_zoom);
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn add_overlay(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    pub fn clear_overlays(&mut self) {
        self.overlays.clear();
    }

    pub fn polygons(&self) -> impl Iterator<Item = &PolygonLayer> {
        self.overlays.iter().filter_map(|o| match o {
            Overlay::Polygon(p) => Some(p),
            Overlay::Circle(_) => None,
        })
    }

    pub fn markers(&self) -> impl Iterator<Item = &MarkerSpec> {
        self.overlays.iter().filter_map(|o| match o {
            Overlay::Circle(m) => Some(m),
            Overlay::Polygon(_) => None,
        })
    }

    pub fn popup_count(&self) -> usize {
        self.polygons().filter(|p| p.popup.is_some()).count()
    }

    pub fn marker_count(&self) -> usize {
        self.markers().count()
    }
}

// Wrapper for RTree indexing
struct PolygonEntry {
    overlay: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEntry {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Spatial index over the polygon overlays of a [`MapView`].
///
/// Only polygons are indexed: circle markers are non-interactive and never
/// swallow a click meant for the polygon underneath.
pub struct OverlayIndex {
    tree: RTree<PolygonEntry>,
}

impl OverlayIndex {
    pub fn new(map: &MapView) -> Self {
        let entries: Vec<PolygonEntry> = map
            .overlays
            .iter()
            .enumerate()
            .filter_map(|(i, overlay)| match overlay {
                Overlay::Polygon(PolygonLayer { geometry: Some(geometry), .. }) => {
                    let rect = geometry.bounding_rect()?;
                    Some(PolygonEntry {
                        overlay: i,
                        aabb: AABB::from_corners(
                            [rect.min().x, rect.min().y],
                            [rect.max().x, rect.max().y],
                        ),
                    })
                }
                _ => None,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// The topmost (last drawn) polygon containing the point decides; a
    /// polygon without a popup yields `None` even if one lies beneath it.
    pub fn popup_at<'a>(&self, map: &'a MapView, point: LatLng) -> Option<&'a PopupContent> {
        let envelope = AABB::from_point([point.lon, point.lat]);
        let target = Point::new(point.lon, point.lat);

        let hit = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| match map.overlays.get(entry.overlay) {
                Some(Overlay::Polygon(PolygonLayer { geometry: Some(geometry), .. })) => {
                    geometry.contains(&target)
                }
                _ => false,
            })
            .map(|entry| entry.overlay)
            .max()?;

        match map.overlays.get(hit) {
            Some(Overlay::Polygon(layer)) => layer.popup.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use geo::polygon;

    fn view() -> MapView {
        let config = AppConfig::default();
        MapView::new(&config.map, &config.tiles)
    }

    fn square(min_lon: f64, min_lat: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min_lon, y: min_lat),
            (x: min_lon + size, y: min_lat),
            (x: min_lon + size, y: min_lat + size),
            (x: min_lon, y: min_lat + size),
            (x: min_lon, y: min_lat),
        ]])
    }

    fn popup(name: &str) -> PopupContent {
        PopupContent {
            name: name.to_string(),
            total_cases: 1.0,
            population: 1000.0,
            per_capita: 1.0,
        }
    }

    #[test]
    fn starts_at_fixed_view_with_base_layer_only() {
        let map = view();
        assert_eq!(map.center(), LatLng::new(43.7, -79.4));
        assert_eq!(map.zoom(), 11.0);
        assert_eq!(map.base_layer().style_id, "mapbox/streets-v11");
        assert!(map.overlays().is_empty());
    }

    #[test]
    fn expands_tile_url() {
        let mut tiles = AppConfig::default().tiles;
        tiles.access_token = "pk.abc".to_string();
        let layer = TileLayer::from_config(&tiles);
        assert_eq!(
            layer.tile_url(10, 286, 373),
            "https://api.mapbox.com/styles/v1/mapbox/streets-v11/tiles/512/10/286/373?access_token=pk.abc"
        );
    }

    #[test]
    fn zoom_offset_is_applied_and_clamped() {
        let layer = view().base_layer().clone();
        assert_eq!(layer.request_zoom(11.0), 10);
        assert_eq!(layer.request_zoom(0.0), 0);
    }

    #[test]
    fn pan_and_zoom() {
        let mut map = view();
        map.set_view(LatLng::new(43.65, -79.38), 30.0);
        assert_eq!(map.center(), LatLng::new(43.65, -79.38));
        assert_eq!(map.zoom(), 18.0);
        map.set_zoom(-2.0);
        assert_eq!(map.zoom(), 0.0);
        map.pan_to(LatLng::new(43.8, -79.2));
        assert_eq!(map.center(), LatLng::new(43.8, -79.2));
    }

    #[test]
    fn inverted_zoom_bounds_do_not_panic() {
        let config = AppConfig::default();
        let mut bounds = config.map.clone();
        bounds.min_zoom = 19.0;
        bounds.max_zoom = 2.0;
        let mut map = MapView::new(&bounds, &config.tiles);
        assert_eq!(map.zoom(), 2.0);

        bounds.min_zoom = f64::NAN;
        bounds.max_zoom = f64::NAN;
        map = MapView::new(&bounds, &config.tiles);
        assert_eq!(map.zoom(), 11.0);
    }

    #[test]
    fn popup_at_ignores_markers() {
        let mut map = view();
        map.add_overlay(Overlay::Polygon(PolygonLayer {
            name: Some("A".to_string()),
            geometry: Some(square(-79.5, 43.6, 0.1)),
            popup: Some(popup("A")),
        }));
        map.add_overlay(Overlay::Circle(MarkerSpec {
            center: LatLng::new(43.9, -79.1),
            radius: 50_000.0,
            color: "#ff0000".to_string(),
            fill_opacity: 0.5,
            interactive: false,
        }));

        let index = OverlayIndex::new(&map);
        assert_eq!(
            index.popup_at(&map, LatLng::new(43.65, -79.45)).map(|p| p.name.as_str()),
            Some("A")
        );
        assert!(index.popup_at(&map, LatLng::new(43.9, -79.1)).is_none());
    }

    #[test]
    fn topmost_polygon_decides() {
        let mut map = view();
        map.add_overlay(Overlay::Polygon(PolygonLayer {
            name: Some("Below".to_string()),
            geometry: Some(square(-79.5, 43.6, 0.2)),
            popup: Some(popup("Below")),
        }));
        map.add_overlay(Overlay::Polygon(PolygonLayer {
            name: Some("Above".to_string()),
            geometry: Some(square(-79.45, 43.65, 0.05)),
            popup: None,
        }));

        let index = OverlayIndex::new(&map);
        assert!(index.popup_at(&map, LatLng::new(43.67, -79.43)).is_none());
        assert_eq!(
            index.popup_at(&map, LatLng::new(43.61, -79.49)).map(|p| p.name.as_str()),
            Some("Below")
        );
    }
}
