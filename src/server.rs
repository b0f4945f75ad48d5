use crate::canvas::{MapView, OverlayIndex, TileLayer};
use crate::config::AppConfig;
use crate::overlay::{MarkerSpec, PopupContent};
use crate::page::INDEX_HTML;
use crate::types::LatLng;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    response::{Html, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub map: MapView,
    pub index: OverlayIndex,
    pub load_error: Option<String>,
}

impl AppState {
    pub fn new(map: MapView, load_error: Option<String>) -> Self {
        let index = OverlayIndex::new(&map);
        Self { map, index, load_error }
    }
}

#[derive(Serialize)]
pub struct ViewResponse {
    center: LatLng,
    zoom: f64,
    tiles: TileLayer,
    load_error: Option<String>,
}

#[derive(Serialize)]
pub struct PolygonResponse {
    name: Option<String>,
    geometry: Option<geojson::Geometry>,
    popup: Option<PopupContent>,
    popup_html: Option<String>,
}

#[derive(Serialize)]
pub struct OverlaysResponse {
    polygons: Vec<PolygonResponse>,
    markers: Vec<MarkerSpec>,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    popup: PopupContent,
    popup_html: String,
}

pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/view", get(view_handler))
        .route("/api/overlays", get(overlays_handler))
        .route("/api/query", get(query_handler));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(
    config: AppConfig,
    map: MapView,
    load_error: Option<String>,
) -> Result<()> {
    info!(
        "Serving {} popups and {} markers",
        map.popup_count(),
        map.marker_count()
    );
    let state = Arc::new(AppState::new(map, load_error));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(state, config.data.static_dir());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn view_handler(State(state): State<Arc<AppState>>) -> Json<ViewResponse> {
    Json(ViewResponse {
        center: state.map.center(),
        zoom: state.map.zoom(),
        tiles: state.map.base_layer().clone(),
        load_error: state.load_error.clone(),
    })
}

async fn overlays_handler(State(state): State<Arc<AppState>>) -> Json<OverlaysResponse> {
    let polygons = state
        .map
        .polygons()
        .map(|layer| PolygonResponse {
            name: layer.name.clone(),
            geometry: layer
                .geometry
                .as_ref()
                .map(|mp| geojson::Geometry::new(geojson::Value::from(mp))),
            popup: layer.popup.clone(),
            popup_html: layer.popup.as_ref().map(PopupContent::to_html),
        })
        .collect();

    Json(OverlaysResponse {
        polygons,
        markers: state.map.markers().cloned().collect(),
    })
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let point = LatLng::new(params.lat, params.lon);

    Json(state.index.popup_at(&state.map, point).map(|popup| QueryResponse {
        popup: popup.clone(),
        popup_html: popup.to_html(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::SAMPLE;
    use crate::data::{load_features, parse_features, FeatureSource};
    use crate::overlay::{render_overlays, MarkerStyle};
    use serde_json::Value;

    fn rendered_map() -> MapView {
        let config = AppConfig::default();
        let mut map = MapView::new(&config.map, &config.tiles);
        let features = parse_features(SAMPLE).unwrap();
        render_overlays(&mut map, &features, &MarkerStyle::from(&config.markers));
        map
    }

    async fn spawn(state: AppState, static_dir: Option<PathBuf>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(state), static_dir);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn get_json(url: &str) -> Value {
        let body = reqwest::get(url).await.unwrap().text().await.unwrap();
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn serves_view_and_overlays() {
        let base = spawn(AppState::new(rendered_map(), None), None).await;

        let view = get_json(&format!("{}/api/view", base)).await;
        assert_eq!(view["zoom"], 11.0);
        assert_eq!(view["center"]["lat"], 43.7);
        assert_eq!(view["tiles"]["styleId"], "mapbox/streets-v11");
        assert!(view["load_error"].is_null());

        let overlays = get_json(&format!("{}/api/overlays", base)).await;
        let polygons = overlays["polygons"].as_array().unwrap();
        let markers = overlays["markers"].as_array().unwrap();
        assert_eq!(polygons.len(), 2);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0]["radius"], 50.0);
        assert!(markers[1]["radius"].is_null());
        assert_eq!(markers[0]["interactive"], false);
        assert_eq!(polygons[0]["geometry"]["type"], "MultiPolygon");
        assert!(polygons[0]["popup_html"]
            .as_str()
            .unwrap()
            .contains("Cases Per 1000 People (2016 Census Data): 2.5"));
        assert!(polygons[1]["popup_html"].is_null());
    }

    #[tokio::test]
    async fn query_hits_polygons_only() {
        let base = spawn(AppState::new(rendered_map(), None), None).await;

        let hit = get_json(&format!("{}/api/query?lat=43.7&lon=-79.4", base)).await;
        assert_eq!(hit["popup"]["name"], "Test");
        assert_eq!(hit["popup"]["per_capita"], 2.5);

        // inside the popup-less polygon
        let none = get_json(&format!("{}/api/query?lat=43.7&lon=-79.3", base)).await;
        assert!(none.is_null());

        let outside = get_json(&format!("{}/api/query?lat=44.5&lon=-78.0", base)).await;
        assert!(outside.is_null());
    }

    #[tokio::test]
    async fn degraded_map_reports_load_error() {
        let config = AppConfig::default();
        let map = MapView::new(&config.map, &config.tiles);
        let state = AppState::new(map, Some("failed to read \"docs/out.geojson\"".to_string()));
        let base = spawn(state, None).await;

        let view = get_json(&format!("{}/api/view", base)).await;
        assert_eq!(view["load_error"], "failed to read \"docs/out.geojson\"");

        let overlays = get_json(&format!("{}/api/overlays", base)).await;
        assert!(overlays["polygons"].as_array().unwrap().is_empty());
        assert!(overlays["markers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn loader_fetches_geojson_over_http() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.geojson"), SAMPLE).unwrap();

        let config = AppConfig::default();
        let map = MapView::new(&config.map, &config.tiles);
        let base = spawn(AppState::new(map, None), Some(dir.path().to_path_buf())).await;

        let page = reqwest::get(format!("{}/", base)).await.unwrap().text().await.unwrap();
        assert!(page.contains("/api/overlays"));

        let features = load_features(&FeatureSource::resolve(&base, "out.geojson").unwrap())
            .await
            .unwrap();
        assert_eq!(features.len(), 2);

        let missing = load_features(&FeatureSource::resolve(&base, "missing.geojson").unwrap()).await;
        assert!(matches!(
            missing,
            Err(crate::data::LoadError::Status { status: 404, .. })
        ));
    }
}
