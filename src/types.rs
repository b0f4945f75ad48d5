use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

impl From<[f64; 2]> for LatLng {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

/// One neighbourhood feature from `out.geojson`.
///
/// Properties are kept optional exactly as they arrive; nothing here validates
/// that population is positive or that the centroid exists.
#[derive(Debug, Clone)]
pub struct Neighbourhood {
    pub name: Option<String>,
    pub geometry: Option<MultiPolygon<f64>>,
    pub case_count: Option<f64>,
    pub population: Option<f64>,
    // NaN components when LATITUDE/LONGITUDE are missing
    pub centroid: LatLng,
}
