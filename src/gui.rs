//! Native map viewer using egui
//!
//! Side panel with layer toggles, search, the synchronized list, a detail card
//! and the legend; the central plot draws the shared map scene. Fetches run on
//! the tokio runtime and come back through a channel, and every outcome is
//! applied on the UI thread through the pipeline's liveness check.

use eframe::egui;
use geo::Coord;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::fetch::DatasetFetcher;
use crate::layer::{FetchOutcome, FetchTicket};
use crate::map::{LayerType, MapScene, Paint};
use crate::page::MapPage;
use crate::panel::{self, Legend};
use crate::region::Region;
use crate::render::Rgb;
use crate::selection::LayerEvent;
use crate::stats::RegionStats;

/// Below this width the side panel is forced open on selection
const SMALL_VIEWPORT: f32 = 768.0;

pub fn run_viewer(config: Config, fetcher: Arc<DatasetFetcher>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Handle::try_current()?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_title("Jakarta Environmental Map"),
        ..Default::default()
    };

    eframe::run_native(
        "Jakarta Environmental Map",
        options,
        Box::new(|cc| Ok(Box::new(MapApp::new(cc, config, fetcher, runtime)))),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {}", e))
}

struct MapApp {
    page: MapPage,
    fetcher: Arc<DatasetFetcher>,
    runtime: tokio::runtime::Handle,
    tx: Sender<FetchOutcome>,
    rx: Receiver<FetchOutcome>,
    /// Layer whose list the panel shows
    focused: Option<String>,
    query: String,
    panel_open: bool,
    last_event: Option<LayerEvent>,
    region: Region,
    /// Camera revision already applied to the plot
    applied_view: Option<u64>,
}

impl MapApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        config: Config,
        fetcher: Arc<DatasetFetcher>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::light());
        let (tx, rx) = mpsc::channel();

        Self {
            focused: config.layers.first().map(|l| l.id.clone()),
            page: MapPage::new(&config),
            fetcher,
            runtime,
            tx,
            rx,
            query: String::new(),
            panel_open: true,
            last_event: None,
            region: Region::Central,
            applied_view: None,
        }
    }

    fn spawn(&self, ctx: &egui::Context, ticket: FetchTicket) {
        debug!(layer = ticket.layer_id(), "Spawning fetch");
        let fetcher = self.fetcher.clone();
        let tx = self.tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let outcome = ticket.run(&fetcher).await;
            // The viewer may have closed; nothing to apply then
            let _ = tx.send(outcome);
            ctx.request_repaint();
        });
    }

    fn toggle(&mut self, ctx: &egui::Context, id: &str, on: bool) {
        if on {
            info!(layer = id, "Layer toggled on");
            self.focused = Some(id.to_string());
            if let Ok(Some(ticket)) = self.page.begin_activate(id) {
                self.spawn(ctx, ticket);
            }
        } else {
            info!(layer = id, "Layer toggled off");
            if let Ok(Some(event)) = self.page.deactivate(id) {
                self.last_event = Some(event);
            }
        }
    }

    fn retry(&mut self, ctx: &egui::Context, id: &str) {
        if let Ok(ticket) = self.page.retry(id) {
            self.spawn(ctx, ticket);
        }
    }

    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.rx.try_recv() {
            self.page.complete(outcome);
        }
    }

    fn layers_ui(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let rows: Vec<(String, String, bool, bool)> = self
            .page
            .pipelines()
            .iter()
            .map(|p| (p.id().to_string(), p.config().title.clone(), p.is_active(), p.state().loading))
            .collect();

        for (id, title, active, loading) in rows {
            ui.horizontal(|ui| {
                let mut checked = active;
                if ui.checkbox(&mut checked, &title).changed() {
                    self.toggle(ctx, &id, checked);
                }
                if loading && active {
                    ui.spinner();
                }
                if active && ui.selectable_label(self.focused.as_deref() == Some(id.as_str()), "list").clicked() {
                    self.focused = Some(id.clone());
                }
            });
        }
    }

    fn list_ui(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let Some(id) = self.focused.clone() else {
            return;
        };
        let Ok(pipeline) = self.page.pipeline(&id) else {
            return;
        };
        if !pipeline.is_active() {
            ui.label("Turn the layer on to see its regions.");
            return;
        }

        let state = pipeline.state();
        if let Some(err) = state.error.clone() {
            ui.colored_label(egui::Color32::from_rgb(0xd3, 0x2f, 0x2f), err);
            if ui.button("Retry").clicked() {
                self.retry(ctx, &id);
            }
            return;
        }
        if state.loading {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Loading data...");
            });
            return;
        }

        let layer = pipeline.config().clone();
        let style = pipeline.renderer().style().clone();
        let entries = panel::entries(&layer, state, &style, &self.query);
        let legend = Legend::for_layer(&layer, &style, state.bounds.as_ref());
        let detail = state.selected_record().map(|r| (r.name.clone(), panel::details(layer.kind, r)));
        if state.from_fallback {
            ui.small("Showing locally hosted data");
        }
        if let Some(fetched_at) = state.fetched_at {
            ui.small(format!("Fetched {}", fetched_at.format("%H:%M:%S UTC")));
        }
        if state.skipped > 0 {
            ui.small(format!("{} features skipped (missing data)", state.skipped));
        }

        ui.horizontal(|ui| {
            ui.label("Search:");
            ui.text_edit_singleline(&mut self.query);
        });
        ui.label(format!("{} of {}", entries.len(), state.records.len()));

        let mut clicked = None;
        egui::ScrollArea::vertical().max_height(260.0).show(ui, |ui| {
            if entries.is_empty() {
                ui.weak("No matching regions");
            }
            for entry in &entries {
                ui.horizontal(|ui| {
                    ui.colored_label(color32(entry.color, 1.0), "●");
                    let text = format!("{}  {}", entry.name, entry.metric_label);
                    if ui.selectable_label(entry.selected, text).clicked() {
                        clicked = Some(entry.id.clone());
                    }
                });
                if let Some(subtitle) = &entry.subtitle {
                    ui.weak(subtitle);
                }
            }
        });
        if let Some(record) = clicked {
            if let Ok(Some(event)) = self.page.select(&id, &record) {
                self.last_event = Some(event);
            }
        }

        if let Some((name, rows)) = detail {
            ui.separator();
            ui.group(|ui| {
                ui.horizontal(|ui| {
                    ui.strong(name);
                    if ui.small_button("✕").clicked() {
                        if let Ok(Some(event)) = self.page.deselect(&id) {
                            self.last_event = Some(event);
                        }
                    }
                });
                egui::Grid::new("detail_rows").striped(true).show(ui, |ui| {
                    for row in rows {
                        ui.label(row.label);
                        ui.label(row.value);
                        ui.end_row();
                    }
                });
            });
        }

        if let Some(legend) = legend {
            ui.separator();
            ui.strong(legend.title);
            for item in legend.items {
                ui.horizontal(|ui| {
                    ui.colored_label(color32(item.color, 1.0), "■");
                    ui.label(item.label);
                });
            }
        }
    }

    fn region_ui(&mut self, ui: &mut egui::Ui) {
        egui::ComboBox::from_id_salt("region")
            .selected_text(self.region.english())
            .show_ui(ui, |ui| {
                for region in Region::ALL {
                    ui.selectable_value(&mut self.region, region, region.english());
                }
            });

        let stats = RegionStats::generate(self.region);
        ui.colored_label(color32(self.region.color(), 1.0), self.region.kota());
        ui.horizontal(|ui| {
            ui.colored_label(color32(stats.risk_color(), 1.0), format!("Risk {}/100", stats.risk_score));
            ui.label(format!("AQI {}", stats.aqi_value));
            ui.label(format!("{:?} · {:?}", stats.alert_level, stats.trend));
        });

        let summary = self.page.region_summary(self.region);
        for layer in summary.layers {
            ui.small(format!("{}: {} records", layer.layer, layer.records.len()));
        }
    }
}

fn color32(rgb: Rgb, opacity: f64) -> egui::Color32 {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    egui::Color32::from_rgba_unmultiplied(rgb.0, rgb.1, rgb.2, alpha)
}

/// Half the visible longitude span at a web-map zoom level
fn half_span(zoom: f64) -> f64 {
    360.0 / 2f64.powf(zoom)
}

fn draw_scene(plot_ui: &mut egui_plot::PlotUi, scene: &MapScene) {
    for layer in scene.layers() {
        for feature in scene.visible_features(layer) {
            let opacity = scene.opacity_of(layer, &feature.id);
            let color = match layer.paint {
                Paint::Feature => feature.fill,
                Paint::Fixed(rgb) => rgb,
            };

            match layer.kind {
                LayerType::Fill | LayerType::FillExtrusion => {
                    for ring in crate::geometry::exterior_rings(&feature.geometry) {
                        plot_ui.polygon(
                            egui_plot::Polygon::new(egui_plot::PlotPoints::from(ring))
                                .fill_color(color32(color, opacity))
                                .stroke(egui::Stroke::NONE),
                        );
                    }
                }
                LayerType::Line => {
                    for ring in crate::geometry::exterior_rings(&feature.geometry) {
                        plot_ui.line(
                            egui_plot::Line::new(egui_plot::PlotPoints::from(ring))
                                .color(color32(color, opacity))
                                .width(layer.width as f32),
                        );
                    }
                }
                LayerType::Symbol => {
                    if let Some([x, y]) = feature.centroid {
                        plot_ui.text(
                            egui_plot::Text::new(egui_plot::PlotPoint::new(x, y), feature.name.clone())
                                .color(color32(color, opacity)),
                        );
                    }
                }
                LayerType::Circle | LayerType::Heatmap => {
                    if let Some(center) = feature.centroid {
                        let radius = match layer.kind {
                            LayerType::Heatmap => layer.width * (0.3 + 0.7 * feature.weight),
                            _ => layer.width,
                        };
                        plot_ui.points(
                            egui_plot::Points::new(vec![center])
                                .radius(radius as f32)
                                .color(color32(color, opacity))
                                .filled(true),
                        );
                    }
                }
            }
        }
    }
}

impl eframe::App for MapApp {
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("Map viewer closing");
        self.page.unmount();
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_outcomes();

        self.page
            .set_small_viewport(ctx.screen_rect().width() < SMALL_VIEWPORT);
        if self.page.take_panel_request() {
            self.panel_open = true;
        }

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.toggle_value(&mut self.panel_open, "☰ Layers");
                ui.separator();
                match &self.last_event {
                    Some(LayerEvent::Select { layer, name, category, .. }) => {
                        ui.label(format!("{}: {} ({})", layer, name, category));
                    }
                    Some(LayerEvent::Deselect { layer }) => {
                        ui.weak(format!("{}: nothing selected", layer));
                    }
                    None => {
                        ui.weak("Click a region on the map or in the list");
                    }
                }
            });
        });

        let panel_open = self.panel_open;
        egui::SidePanel::left("layers_panel")
            .min_width(300.0)
            .show_animated(ctx, panel_open, |ui| {
                ui.heading("Layers");
                self.layers_ui(ctx, ui);
                ui.separator();
                self.list_ui(ctx, ui);
                ui.separator();
                ui.heading("Region");
                self.region_ui(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            let (camera, flying, revision) = {
                let mut scene = self.page.map().lock();
                let flying = scene.is_flying();
                (scene.advance(Instant::now()), flying, scene.camera_revision())
            };
            let apply_view = flying || self.applied_view != Some(revision);

            let scene = self.page.map().lock();
            let plot = egui_plot::Plot::new("map_plot")
                .data_aspect(1.0)
                .allow_drag(true)
                .allow_zoom(true)
                .allow_scroll(true)
                .allow_double_click_reset(false)
                .show_axes(false)
                .show_grid(false);

            let response = plot.show(ui, |plot_ui| {
                if apply_view {
                    let half = half_span(camera.zoom);
                    let [x, y] = camera.center;
                    plot_ui.set_plot_bounds(egui_plot::PlotBounds::from_min_max(
                        [x - half, y - half],
                        [x + half, y + half],
                    ));
                }
                draw_scene(plot_ui, &scene);
                (plot_ui.pointer_coordinate(), plot_ui.plot_bounds().width())
            });
            drop(scene);

            if apply_view {
                self.applied_view = Some(revision);
            }

            let (pointer, width) = response.inner;
            // Points are hit within 1% of the visible width
            let radius = width / 100.0;
            let pointer = pointer.map(|p| Coord { x: p.x, y: p.y });
            if response.response.clicked() {
                if let Some(at) = pointer {
                    if let Some(event) = self.page.click(at, radius) {
                        self.last_event = Some(event);
                    }
                }
            }
            self.page
                .hover(pointer.filter(|_| response.response.hovered()), radius);

            if flying {
                ctx.request_repaint();
            }
        });
    }
}
