use crate::types::{LatLng, Neighbourhood};
use geo::MultiPolygon;
use geojson::GeoJson;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const PROP_NAME: &str = "AREA_NAME";
pub const PROP_CASES: &str = "covid_case_count";
pub const PROP_POPULATION: &str = "population";
pub const PROP_LATITUDE: &str = "LATITUDE";
pub const PROP_LONGITUDE: &str = "LONGITUDE";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request failed")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to parse GeoJSON")]
    Parse(#[from] geojson::Error),
    #[error("invalid data URL {base:?}")]
    Url {
        base: String,
        #[source]
        source: url::ParseError,
    },
    #[error("GeoJSON must be a FeatureCollection")]
    NotACollection,
    #[error("feature {index} has an unconvertible geometry")]
    Geometry {
        index: usize,
        #[source]
        source: geojson::Error,
    },
}

/// Where the feature collection lives.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureSource {
    Http(String),
    File(PathBuf),
}

impl FeatureSource {
    /// Resolves a relative resource path against an http(s) base URL, the
    /// way a browser would, or joins it onto a local directory.
    pub fn resolve(base: &str, relative: &str) -> Result<Self, LoadError> {
        if is_url(base) {
            let url = Url::parse(base)
                .and_then(|b| b.join(relative))
                .map_err(|source| LoadError::Url {
                    base: base.to_string(),
                    source,
                })?;
            Ok(FeatureSource::Http(url.to_string()))
        } else {
            Ok(FeatureSource::File(PathBuf::from(base).join(relative)))
        }
    }
}

pub fn is_url(base: &str) -> bool {
    base.starts_with("http://") || base.starts_with("https://")
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSource::Http(url) => write!(f, "{}", url),
            FeatureSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Single fetch of the feature collection. No retry, no cache.
pub async fn load_features(source: &FeatureSource) -> Result<Vec<Neighbourhood>, LoadError> {
    info!("Loading features from {}...", source);

    let body = match source {
        FeatureSource::Http(url) => {
            let response = reqwest::get(url).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            response.text().await?
        }
        FeatureSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?,
    };

    let features = parse_features(&body)?;
    info!("Loaded {} neighbourhood features", features.len());
    Ok(features)
}

pub fn parse_features(body: &str) -> Result<Vec<Neighbourhood>, LoadError> {
    let geojson: GeoJson = body.parse()?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(LoadError::NotACollection),
    };

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let geometry = match feature.geometry {
                Some(geom) => {
                    let geom: geo::Geometry<f64> = geom
                        .value
                        .try_into()
                        .map_err(|source| LoadError::Geometry { index, source })?;
                    match geom {
                        geo::Geometry::MultiPolygon(mp) => Some(mp),
                        geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
                        other => {
                            debug!("Feature {} has non-polygon geometry {:?}", index, other);
                            None
                        }
                    }
                }
                None => None,
            };

            let empty = Map::new();
            let props = feature.properties.as_ref().unwrap_or(&empty);

            Ok(Neighbourhood {
                name: props.get(PROP_NAME).and_then(Value::as_str).map(str::to_owned),
                geometry,
                case_count: number(props, PROP_CASES),
                population: number(props, PROP_POPULATION),
                centroid: LatLng::new(
                    number(props, PROP_LATITUDE).unwrap_or(f64::NAN),
                    number(props, PROP_LONGITUDE).unwrap_or(f64::NAN),
                ),
            })
        })
        .collect()
}

fn number(props: &Map<String, Value>, key: &str) -> Option<f64> {
    props.get(key).and_then(Value::as_f64)
}
