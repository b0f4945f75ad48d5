use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{ensure, Context, Result};

use crate::data::{self, FeatureSource, LoadError};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub map: MapConfig,
    pub tiles: TileConfig,
    pub data: DataConfig,
    pub markers: MarkerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center: [f64; 2], // [lat, lon]
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [43.7, -79.4],
            zoom: 11.0,
            min_zoom: 0.0,
            max_zoom: 18.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TileConfig {
    pub url_template: String,
    pub style_id: String,
    pub tile_size: u32,
    pub zoom_offset: i32,
    pub access_token: String,
    pub attribution: String,
    /// Per-tile request timeout for snapshot rendering.
    pub timeout_ms: u64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            url_template: "https://api.mapbox.com/styles/v1/{id}/tiles/{tileSize}/{z}/{x}/{y}?access_token={accessToken}".to_string(),
            style_id: "mapbox/streets-v11".to_string(),
            tile_size: 512,
            zoom_offset: -1,
            access_token: String::new(),
            attribution: "Map data &copy; OpenStreetMap contributors, Imagery &copy; Mapbox".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// Directory or http(s) URL that `path` is resolved against.
    pub base: String,
    pub path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base: "docs".to_string(),
            path: "out.geojson".to_string(),
        }
    }
}

impl DataConfig {
    pub fn source(&self) -> Result<FeatureSource, LoadError> {
        FeatureSource::resolve(&self.base, &self.path)
    }

    /// Local directory the server exposes as static files, if `base` is one.
    pub fn static_dir(&self) -> Option<PathBuf> {
        if data::is_url(&self.base) {
            None
        } else {
            Some(PathBuf::from(&self.base))
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarkerConfig {
    pub color: String, // Hex code
    pub fill_opacity: f32,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            color: "#ff0000".to_string(),
            fill_opacity: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let map = &self.map;
        ensure!(
            map.min_zoom.is_finite() && map.max_zoom.is_finite() && map.zoom.is_finite(),
            "[map] zoom, min_zoom and max_zoom must be finite numbers"
        );
        ensure!(
            map.min_zoom <= map.max_zoom,
            "[map] min_zoom ({}) is greater than max_zoom ({})",
            map.min_zoom,
            map.max_zoom
        );
        ensure!(
            map.center.iter().all(|c| c.is_finite()),
            "[map] center must be finite coordinates"
        );
        Ok(())
    }

    /// Built-in defaults unless a config file was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}
