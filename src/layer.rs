//! Layer pipeline: fetch → classify → render, plus selection
//!
//! One `LayerPipeline` per layer kind, all sharing the page's `MapHandle`.
//! Activation is split in two so a caller never holds the pipeline across
//! network I/O: `begin_activate` hands out a `FetchTicket`, the ticket runs
//! without touching the pipeline, and `complete` applies the outcome only if
//! the layer is still active and the ticket is from the current attempt.

use chrono::{DateTime, Utc};
use geo::Coord;
use serde::Serialize;
use std::sync::Arc;

use crate::classify::{Bounds, FeatureClassifier, RecordId, RegionRecord};
use crate::config::{FlyToConfig, LayerConfig};
use crate::error::LayerError;
use crate::fetch::{Dataset, DatasetFetcher};
use crate::map::{MapEvent, MapHandle};
use crate::render::LayerRenderer;
use crate::selection::{LayerEvent, SelectionController, SelectionEffect};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerState {
    pub loaded: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub records: Vec<RegionRecord>,
    pub bounds: Option<Bounds>,
    pub selected: Option<RecordId>,
    /// Where the current records came from
    pub source: Option<String>,
    pub from_fallback: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Features dropped for missing or invalid properties
    pub skipped: usize,
}

impl LayerState {
    pub fn record(&self, id: &str) -> Option<&RegionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn selected_record(&self) -> Option<&RegionRecord> {
        self.selected.as_deref().and_then(|id| self.record(id))
    }
}

/// A pending fetch for one activation attempt
#[derive(Debug, Clone)]
pub struct FetchTicket {
    layer_id: String,
    epoch: u64,
    url: String,
    fallback: Option<String>,
    bypass_cache: bool,
}

impl FetchTicket {
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub async fn run(self, fetcher: &DatasetFetcher) -> FetchOutcome {
        let fallback = self.fallback.as_deref();
        let result = if self.bypass_cache {
            fetcher.fetch_fresh(&self.url, fallback).await
        } else {
            fetcher.fetch(&self.url, fallback).await
        };
        FetchOutcome {
            layer_id: self.layer_id,
            epoch: self.epoch,
            result,
        }
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub layer_id: String,
    epoch: u64,
    pub result: Result<Arc<Dataset>, LayerError>,
}

pub struct LayerPipeline {
    config: LayerConfig,
    map: MapHandle,
    renderer: LayerRenderer,
    selection: SelectionController,
    state: LayerState,
    active: bool,
    /// Bumped by `retry`; outcomes from older attempts are stale
    epoch: u64,
    in_flight: bool,
    panel_requested: bool,
}

impl LayerPipeline {
    pub fn new(config: LayerConfig, map: MapHandle, fly_to: FlyToConfig) -> Self {
        let renderer = LayerRenderer::new(&config, fly_to);
        Self {
            config,
            map,
            renderer,
            selection: SelectionController::new(),
            state: LayerState::default(),
            active: false,
            epoch: 0,
            in_flight: false,
            panel_requested: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn state(&self) -> &LayerState {
        &self.state
    }

    pub fn renderer(&self) -> &LayerRenderer {
        &self.renderer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_small_viewport(&mut self, small: bool) {
        self.selection.set_small_viewport(small);
    }

    /// True once after a selection asked for the side panel to open
    pub fn take_panel_request(&mut self) -> bool {
        std::mem::take(&mut self.panel_requested)
    }

    /// Mark the layer visible. Cached records are rendered straight away;
    /// otherwise a ticket is returned unless a fetch is already in flight.
    pub fn begin_activate(&mut self) -> Option<FetchTicket> {
        self.active = true;

        if self.state.loaded {
            self.render();
            return None;
        }
        if self.in_flight {
            tracing::debug!(layer = %self.config.id, "Fetch already in flight");
            self.state.loading = true;
            return None;
        }
        Some(self.issue_ticket(false))
    }

    /// Re-run the whole pipeline, bypassing the dataset cache
    pub fn retry(&mut self) -> FetchTicket {
        self.active = true;
        self.epoch += 1;
        tracing::info!(layer = %self.config.id, epoch = self.epoch, "Retrying layer");
        self.issue_ticket(true)
    }

    fn issue_ticket(&mut self, bypass_cache: bool) -> FetchTicket {
        self.in_flight = true;
        self.state.loading = true;
        self.state.error = None;
        FetchTicket {
            layer_id: self.config.id.clone(),
            epoch: self.epoch,
            url: self.config.url.clone(),
            fallback: self.config.fallback_url.clone(),
            bypass_cache,
        }
    }

    /// Apply a finished fetch. Returns false when the outcome was discarded.
    pub fn complete(&mut self, outcome: FetchOutcome) -> bool {
        if outcome.epoch != self.epoch {
            tracing::warn!(layer = %self.config.id, "Discarding response from a superseded attempt");
            return false;
        }
        self.in_flight = false;
        self.state.loading = false;

        if !self.active {
            tracing::warn!(layer = %self.config.id, "Layer deactivated before its data arrived, discarding");
            return false;
        }

        let classified = outcome.result.and_then(|dataset| {
            FeatureClassifier::for_layer(&self.config)
                .classify(&dataset.collection)
                .map(|c| (dataset, c))
        });

        match classified {
            Ok((dataset, classified)) => {
                // A retry may drop the selected record
                if let Some(id) = self.state.selected.clone() {
                    if !classified.records.iter().any(|r| r.id == id) {
                        self.deselect();
                    }
                }
                self.state.records = classified.records;
                self.state.bounds = Some(classified.bounds);
                self.state.loaded = true;
                self.state.error = None;
                self.state.source = Some(dataset.source.clone());
                self.state.from_fallback = dataset.from_fallback;
                self.state.fetched_at = Some(dataset.fetched_at);
                self.state.skipped = classified.skipped;
                self.render();
            }
            Err(err) => {
                tracing::error!(layer = %self.config.id, "Layer failed: {}", err);
                self.deselect();
                self.state.records.clear();
                self.state.bounds = None;
                self.state.skipped = 0;
                self.state.loaded = false;
                self.state.error = Some(err.to_string());
                let mut map = self.map.lock();
                self.renderer.deactivate(&mut *map);
            }
        }
        true
    }

    /// Activate and wait for the data in one go
    pub async fn activate(&mut self, fetcher: &DatasetFetcher) -> &LayerState {
        if let Some(ticket) = self.begin_activate() {
            let outcome = ticket.run(fetcher).await;
            self.complete(outcome);
        }
        &self.state
    }

    /// Hide the layer: drop the selection and map resources, keep the records
    pub fn deactivate(&mut self) -> Option<LayerEvent> {
        if !self.active {
            return None;
        }
        self.active = false;
        let event = self.deselect();
        let mut map = self.map.lock();
        self.renderer.deactivate(&mut *map);
        event
    }

    fn render(&mut self) {
        let Some(bounds) = self.state.bounds else {
            return;
        };
        let mut map = self.map.lock();
        self.renderer.activate(&mut *map, &self.state.records, &bounds);
    }

    /// Select a record by id, from the map or the list
    pub fn select(&mut self, id: &str) -> Option<LayerEvent> {
        if !self.active {
            return None;
        }
        let record = self.state.record(id)?.clone();
        let effects = self.selection.select(record.id.clone());
        self.apply(effects);
        self.state.selected = self.selection.selected().cloned();
        Some(LayerEvent::select(&self.config.id, &record))
    }

    pub fn deselect(&mut self) -> Option<LayerEvent> {
        let effects = self.selection.deselect();
        if effects.is_empty() {
            return None;
        }
        self.apply(effects);
        self.state.selected = self.selection.selected().cloned();
        Some(LayerEvent::Deselect {
            layer: self.config.id.clone(),
        })
    }

    fn apply(&mut self, effects: Vec<SelectionEffect>) {
        let mut map = self.map.lock();
        for effect in effects {
            match effect {
                SelectionEffect::ClearHighlight(_) => self.renderer.highlight(&mut *map, None),
                SelectionEffect::Highlight(id) => self.renderer.highlight(&mut *map, Some(&id)),
                SelectionEffect::FlyTo(id) => {
                    if let Some(record) = self.state.record(&id) {
                        self.renderer.fly_to(&mut *map, record);
                    }
                }
                SelectionEffect::OpenPanel => self.panel_requested = true,
            }
        }
    }

    /// Does a hit on this map layer belong to this pipeline?
    pub fn owns(&self, layer_id: &str) -> bool {
        layer_id == self.renderer.interactive_layer_id() && self.renderer.owns_layer(layer_id)
    }

    /// Click at a map coordinate; selects the feature under it, if ours
    pub fn click(&mut self, at: Coord<f64>, point_radius: f64) -> Option<LayerEvent> {
        let hit = self.map.lock().hit(at, MapEvent::Click, point_radius)?;
        if !self.owns(&hit.layer) {
            return None;
        }
        self.select(&hit.id)
    }

    /// Hover at a map coordinate, or `None` when the pointer left the map
    pub fn hover(&mut self, at: Option<Coord<f64>>, point_radius: f64) {
        if !self.active {
            return;
        }
        let mut map = self.map.lock();
        let hovered = at
            .and_then(|at| map.hit(at, MapEvent::Hover, point_radius))
            .filter(|hit| self.owns(&hit.layer))
            .map(|hit| hit.id);
        self.renderer.hover(&mut *map, hovered.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MapConfig};
    use crate::fetch::FetchPolicy;
    use axum::{extract::State, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const AIR: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","id":"js","properties":{"wilayah":"Jakarta Selatan","data_udara_final_max":55},
         "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type":"Feature","id":"jp","properties":{"wilayah":"Jakarta Pusat","data_udara_final_max":95},
         "geometry":{"type":"Polygon","coordinates":[[[2,0],[3,0],[3,1],[2,1],[2,0]]]}},
        {"type":"Feature","id":"jb","properties":{"wilayah":"Jakarta Barat","data_udara_final_max":75},
         "geometry":{"type":"Polygon","coordinates":[[[4,0],[5,0],[5,1],[4,1],[4,0]]]}}]}"#;

    async fn counted(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
        hits.fetch_add(1, Ordering::SeqCst);
        AIR
    }

    async fn serve(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route("/air.json", get(counted))
            .route(
                "/slow.json",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    AIR
                }),
            )
            .route("/empty.json", get(|| async { r#"{"type":"FeatureCollection","features":[]}"# }))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fetcher() -> DatasetFetcher {
        DatasetFetcher::new(FetchPolicy {
            timeout: Duration::from_millis(200),
            retries: 0,
            backoff: Duration::from_millis(10),
        })
        .unwrap()
    }

    fn pipeline(url: String, fallback: Option<String>) -> (LayerPipeline, MapHandle) {
        let mut layer = Config::jakarta_default().get_layer("air-quality").unwrap().clone();
        layer.url = url;
        layer.fallback_url = fallback;
        let map = MapHandle::new(&MapConfig::default());
        (LayerPipeline::new(layer, map.clone(), Default::default()), map)
    }

    #[tokio::test]
    async fn test_activate_twice_no_duplicates() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        let fetcher = fetcher();

        layer.activate(&fetcher).await;
        let first = map.lock().layer_ids().iter().map(|s| s.to_string()).collect::<Vec<_>>();
        layer.activate(&fetcher).await;

        assert_eq!(map.lock().layer_ids(), first);
        assert_eq!(map.lock().source_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let names: Vec<&str> = layer.state().records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Jakarta Pusat", "Jakarta Barat", "Jakarta Selatan"]);
        assert!(layer.state().fetched_at.is_some());
        assert_eq!(layer.state().skipped, 0);
    }

    #[tokio::test]
    async fn test_select_a_then_b_leaves_one_highlight() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        layer.activate(&fetcher()).await;

        layer.select("js").unwrap();
        let event = layer.select("jp").unwrap();
        assert!(matches!(event, LayerEvent::Select { ref id, .. } if id == "jp"));

        let scene = map.lock();
        let highlights: Vec<_> = scene.layers().iter().filter(|l| l.filter.is_some()).collect();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].filter.as_deref(), Some("jp"));
        // centroid of the jp square, closing vertex included
        assert_eq!(scene.camera().center, [2.4, 0.4]);
        assert_eq!(layer.state().selected.as_deref(), Some("jp"));
    }

    #[tokio::test]
    async fn test_reactivate_uses_cached_records() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        let fetcher = fetcher();

        layer.activate(&fetcher).await;
        let order: Vec<String> = layer.state().records.iter().map(|r| r.id.clone()).collect();
        layer.select("jb");

        let event = layer.deactivate();
        assert!(matches!(event, Some(LayerEvent::Deselect { .. })));
        assert!(map.lock().layer_ids().is_empty());
        assert_eq!(layer.state().selected, None);
        assert!(layer.begin_activate().is_none());

        let again: Vec<String> = layer.state().records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(order, again);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!map.lock().layer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        let fetcher = fetcher();

        let ticket = layer.begin_activate().unwrap();
        // Second activation while in flight issues nothing
        assert!(layer.begin_activate().is_none());
        layer.deactivate();

        let outcome = ticket.run(&fetcher).await;
        assert!(!layer.complete(outcome));
        assert!(!layer.state().loaded);
        assert!(map.lock().layer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_retry_supersedes_pending_fetch() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, _map) = pipeline(format!("{}/air.json", base), None);
        let fetcher = fetcher();

        let old = layer.begin_activate().unwrap();
        let fresh = layer.retry();

        let old = old.run(&fetcher).await;
        assert!(!layer.complete(old));
        assert!(layer.state().loading);

        let fresh = fresh.run(&fetcher).await;
        assert!(layer.complete(fresh));
        assert!(layer.state().loaded);
    }

    #[tokio::test]
    async fn test_retry_refetches_past_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(hits.clone()).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        let fetcher = fetcher();

        layer.activate(&fetcher).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        layer.select("jb").unwrap();

        let ticket = layer.retry();
        assert!(layer.state().loading);
        // Old records stay up while the retry is out
        assert_eq!(layer.state().records.len(), 3);

        let outcome = ticket.run(&fetcher).await;
        assert!(layer.complete(outcome));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(layer.state().loaded);
        assert!(!layer.state().loading);
        assert_eq!(layer.state().selected.as_deref(), Some("jb"));
        assert_eq!(map.lock().source_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fallback_populates_records() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, _map) = pipeline(format!("{}/slow.json", base), Some(format!("{}/air.json", base)));

        let state = layer.activate(&fetcher()).await;
        assert!(state.loaded);
        assert!(state.from_fallback);
        assert_eq!(state.records.len(), 3);
    }

    #[tokio::test]
    async fn test_error_renders_nothing() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, map) = pipeline(format!("{}/empty.json", base), None);

        let state = layer.activate(&fetcher()).await;
        assert!(!state.loaded);
        assert!(state.error.as_deref().unwrap().contains("no valid features"));
        assert!(map.lock().layer_ids().is_empty());
        assert_eq!(map.lock().source_count(), 0);
    }

    #[tokio::test]
    async fn test_click_and_hover_route_through_map() {
        let base = serve(Arc::new(AtomicUsize::new(0))).await;
        let (mut layer, map) = pipeline(format!("{}/air.json", base), None);
        layer.activate(&fetcher()).await;

        let event = layer.click(Coord { x: 4.5, y: 0.5 }, 0.0).unwrap();
        assert!(matches!(event, LayerEvent::Select { ref name, .. } if name == "Jakarta Barat"));
        assert!(layer.click(Coord { x: 10.0, y: 10.0 }, 0.0).is_none());

        layer.hover(Some(Coord { x: 0.5, y: 0.5 }), 0.0);
        {
            let scene = map.lock();
            let fill = scene.layers().iter().find(|l| l.id == "air-quality-fill").unwrap();
            assert_eq!(scene.opacity_of(fill, "js"), 0.9);
        }
        layer.hover(None, 0.0);
        let scene = map.lock();
        let fill = scene.layers().iter().find(|l| l.id == "air-quality-fill").unwrap();
        assert_eq!(scene.opacity_of(fill, "js"), 0.8);
    }
}
