pub mod types;
pub mod config;
pub mod data;
pub mod canvas;
pub mod overlay;
pub mod render;
pub mod page;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::canvas::MapView;
use crate::config::AppConfig;
use crate::overlay::MarkerStyle;
use crate::types::LatLng;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the interactive map
    Serve {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Render the overlays at the configured view into a PNG
    Snapshot {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE", default_value = "snapshot.png")]
        output: PathBuf,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 768)]
        height: u32,
        /// Latitude to center on instead of the configured center
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude to center on instead of the configured center
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Zoom level instead of the configured zoom
        #[arg(long)]
        zoom: Option<f64>,
        /// Skip fetching base tiles and render overlays on transparency
        #[arg(long)]
        no_base_tiles: bool,
    },
    /// Print the computed overlays as JSON
    Overlays {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// Builds the map and runs the one-shot load and render.
///
/// A load failure is logged and returned as text; the map keeps its base layer.
async fn build_map(config: &AppConfig) -> (MapView, Option<String>) {
    let mut map = MapView::new(&config.map, &config.tiles);
    let style = MarkerStyle::from(&config.markers);

    let loaded = match config.data.source() {
        Ok(source) => overlay::populate(&mut map, &source, &style).await,
        Err(e) => Err(e),
    };

    match loaded {
        Ok(_) => (map, None),
        Err(e) => {
            let e = anyhow::Error::new(e);
            warn!("Neighbourhood data unavailable, showing base map only: {:#}", e);
            (map, Some(format!("{:#}", e)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = AppConfig::load(config.as_deref())?;
            let (map, load_error) = build_map(&app_config).await;
            server::start_server(app_config, map, load_error).await?;
        }
        Commands::Snapshot { config, output, width, height, lat, lon, zoom, no_base_tiles } => {
            let app_config = AppConfig::load(config.as_deref())?;
            let (mut map, _) = build_map(&app_config).await;
            let center = match (lat, lon) {
                (Some(lat), Some(lon)) => LatLng::new(*lat, *lon),
                _ => map.center(),
            };
            map.set_view(center, zoom.unwrap_or(map.zoom()));
            let img = if *no_base_tiles {
                render::render_snapshot(&map, *width, *height)
            } else {
                let timeout = Duration::from_millis(app_config.tiles.timeout_ms);
                let base = render::fetch_base_layer(&map, *width, *height, timeout).await;
                render::draw_overlays(&map, base)
            };
            render::save_snapshot(&img, output)?;
            info!("Snapshot complete!");
        }
        Commands::Overlays { config } => {
            let app_config = AppConfig::load(config.as_deref())?;
            let (map, load_error) = build_map(&app_config).await;
            if let Some(e) = load_error {
                anyhow::bail!(e);
            }
            println!("{}", serde_json::to_string_pretty(map.overlays())?);
        }
    }

    Ok(())
}
