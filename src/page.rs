/// Browser front end. Base tiles come straight from the provider; overlays
/// and popup HTML come from `/api/overlays`, so nothing is computed here.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0"/>
  <title>COVID-19 Cases by Toronto Neighbourhood</title>
  <link
    rel="stylesheet"
    href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"
    integrity="sha256-p4NxAoJBhIIN+hmNHrzRCf9tD/miZyoHS5obTRR9BMY="
    crossorigin=""
  />
  <style>
    html, body { height: 100%; margin: 0; padding: 0; }
    #map { height: 100%; width: 100%; }
    #status {
      position: absolute;
      bottom: 24px;
      left: 12px;
      z-index: 1000;
      background: white;
      padding: 4px 8px;
      border-radius: 4px;
      box-shadow: 0 1px 4px rgba(0,0,0,0.3);
      display: none;
    }
  </style>
</head>
<body>
  <div id="map"></div>
  <div id="status"></div>
  <script
    src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"
    integrity="sha256-20nQCchB9co0qIjJZRGuk2/Z9VM+kNiyxNV1lvTlZBo="
    crossorigin=""
  ></script>
  <script>
    async function main() {
      const view = await (await fetch('/api/view')).json();
      const map = L.map('map').setView([view.center.lat, view.center.lon], view.zoom);
      const t = view.tiles;
      L.tileLayer(t.urlTemplate, {
        id: t.styleId,
        tileSize: t.tileSize,
        zoomOffset: t.zoomOffset,
        accessToken: t.accessToken,
        attribution: t.attribution,
      }).addTo(map);

      if (view.load_error) {
        const status = document.getElementById('status');
        status.textContent = 'Neighbourhood data unavailable';
        status.style.display = 'block';
        return;
      }

      const overlays = await (await fetch('/api/overlays')).json();
      for (const p of overlays.polygons) {
        const layer = L.geoJSON(p.geometry);
        if (p.popup_html) {
          layer.bindPopup(p.popup_html);
        }
        layer.addTo(map);
      }
      for (const m of overlays.markers) {
        if (m.radius === null || m.center.lat === null || m.center.lon === null) {
          continue;
        }
        L.circle([m.center.lat, m.center.lon], {
          radius: m.radius,
          color: m.color,
          fillOpacity: m.fill_opacity,
          interactive: m.interactive,
        }).addTo(map);
      }
    }
    main();
  </script>
</body>
</html>
"#;
