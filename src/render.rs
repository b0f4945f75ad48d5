use crate::canvas::MapView;
use anyhow::{Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MapCoords, MultiPolygon, Point, Rect};
use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

// Web Mercator world size at zoom 0
const TILE_SIZE: f64 = 256.0;
// Leaflet's default path style
const POLYGON_COLOR: &str = "#3388ff";
const POLYGON_FILL_OPACITY: f32 = 0.2;

/// Overlays only, on a transparent background.
pub fn render_snapshot(map: &MapView, width: u32, height: u32) -> RgbaImage {
    draw_overlays(map, ImageBuffer::new(width, height))
}

/// Fetches the base tiles covering the view and stitches them into one image.
///
/// A tile that fails to load, or takes longer than `timeout`, is left
/// transparent, same as in the browser.
pub async fn fetch_base_layer(
    map: &MapView,
    width: u32,
    height: u32,
    timeout: Duration,
) -> RgbaImage {
    let mut img: RgbaImage = ImageBuffer::new(width, height);
    let layer = map.base_layer();
    let zoom = map.zoom();
    let tile_zoom = layer.request_zoom(zoom);
    let origin = view_origin(map, width, height);

    // view pixels per provider tile
    let tile_span = TILE_SIZE * 2.0_f64.powf(zoom) / 2.0_f64.powi(tile_zoom as i32);
    let tiles_per_axis = 1u32 << tile_zoom.min(31);
    let tile_range = |from: f64, len: u32| {
        let first = (from / tile_span).floor().max(0.0) as u32;
        let last = (((from + len as f64) / tile_span).ceil().max(0.0) as u32).min(tiles_per_axis);
        first..last
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!("Could not build tile client, skipping base layer: {:#}", e);
            return img;
        }
    };
    let mut loaded = 0;
    let mut failed = 0;

    for ty in tile_range(origin.1, height) {
        for tx in tile_range(origin.0, width) {
            let url = layer.tile_url(tile_zoom, tx, ty);
            match fetch_tile(&client, &url).await {
                Ok(tile) => {
                    let (x, w) = tile_extent(tx, tile_span, origin.0);
                    let (y, h) = tile_extent(ty, tile_span, origin.1);
                    let tile = if tile.width() == w && tile.height() == h {
                        tile
                    } else {
                        imageops::resize(&tile, w, h, imageops::FilterType::Triangle)
                    };
                    imageops::overlay(&mut img, &tile, x, y);
                    loaded += 1;
                }
                Err(e) => {
                    debug!("Base tile {}/{}/{} failed: {:#}", tile_zoom, tx, ty, e);
                    failed += 1;
                }
            }
        }
    }

    if failed > 0 {
        warn!("{} of {} base tiles failed to load", failed, loaded + failed);
    }
    img
}

// Offset and length of tile `index` along one axis. Both edges are rounded
// from the exact span so neighbouring tiles share an edge.
fn tile_extent(index: u32, span: f64, origin: f64) -> (i64, u32) {
    let start = (index as f64 * span - origin).round();
    let end = ((index as f64 + 1.0) * span - origin).round();
    (start as i64, (end - start).max(1.0) as u32)
}

async fn fetch_tile(client: &reqwest::Client, url: &str) -> Result<RgbaImage> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    let tile = image::load_from_memory(&bytes).context("Failed to decode tile")?;
    Ok(tile.to_rgba8())
}

/// Rasterises the overlays of `map` at its current center and zoom onto `img`.
pub fn draw_overlays(map: &MapView, mut img: RgbaImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    info!(
        "Rendering {}x{} snapshot at zoom {} ({} overlays)...",
        width,
        height,
        map.zoom(),
        map.overlays().len()
    );

    let zoom = map.zoom();
    let origin = view_origin(map, width, height);

    let polygons: Vec<(MultiPolygon<f64>, Rect<f64>)> = map
        .polygons()
        .filter_map(|layer| layer.geometry.as_ref())
        .filter_map(|geometry| {
            let projected = geometry.map_coords(|c| {
                let (x, y) = lat_lon_to_world_pixel(c.y, c.x, zoom);
                geo::Coord { x: x - origin.0, y: y - origin.1 }
            });
            let bbox = projected.bounding_rect()?;
            Some((projected, bbox))
        })
        .collect();

    let fill = with_opacity(hex_to_rgba(POLYGON_COLOR), POLYGON_FILL_OPACITY);
    let row_len = width as usize * 4;

    if row_len > 0 {
        img.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let py = y as f64 + 0.5;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let pt = Point::new(x as f64 + 0.5, py);
                for (poly, bbox) in &polygons {
                    if pt.x() < bbox.min().x || pt.x() > bbox.max().x
                        || pt.y() < bbox.min().y || pt.y() > bbox.max().y
                    {
                        continue;
                    }
                    if poly.contains(&pt) {
                        blend(px, fill);
                    }
                }
            }
        });
    }

    for marker in map.markers() {
        if !marker.center.is_finite() || !marker.radius.is_finite() {
            debug!("Skipping marker with non-finite geometry at {:?}", marker.center);
            continue;
        }
        let (mx, my) = lat_lon_to_world_pixel(marker.center.lat, marker.center.lon, zoom);
        let (mx, my) = (mx - origin.0, my - origin.1);
        let r = marker.pixel_radius(zoom);
        let color = with_opacity(hex_to_rgba(&marker.color), marker.fill_opacity);

        let x0 = (mx - r).floor().max(0.0) as u32;
        let y0 = (my - r).floor().max(0.0) as u32;
        let x1 = ((mx + r).ceil().max(0.0) as u32).min(width);
        let y1 = ((my + r).ceil().max(0.0) as u32).min(height);

        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - mx;
                let dy = y as f64 + 0.5 - my;
                if dx * dx + dy * dy <= r * r {
                    blend(&mut img.get_pixel_mut(x, y).0, color);
                }
            }
        }
    }

    img
}

pub fn save_snapshot(img: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    img.save(path)
        .with_context(|| format!("Failed to save snapshot: {:?}", path))?;
    info!("Saved snapshot to {:?}", path);
    Ok(())
}

fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    Rgba([channel(0..2), channel(2..4), channel(4..6), 255])
}

fn with_opacity(color: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([color[0], color[1], color[2], a])
}

// Source-over compositing of `src` onto the pixel `dst`.
fn blend(dst: &mut [u8], src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    for i in 0..3 {
        let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        dst[i] = c.round() as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

// World pixel of the view's top-left corner
fn view_origin(map: &MapView, width: u32, height: u32) -> (f64, f64) {
    let center = map.center();
    let (cx, cy) = lat_lon_to_world_pixel(center.lat, center.lon, map.zoom());
    (cx - width as f64 / 2.0, cy - height as f64 / 2.0)
}

// Coordinate conversions
fn lat_lon_to_world_pixel(lat: f64, lon: f64, zoom: f64) -> (f64, f64) {
    let n = TILE_SIZE * 2.0_f64.powf(zoom);
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x, y)
}
