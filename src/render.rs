//! Layer renderer
//!
//! Owns the named map resources of one layer: a source `{id}-source` and the
//! visual layers derived from the style (`{id}-fill`, `{id}-line`, ...).
//! `activate` is idempotent and `deactivate` removes only what this renderer
//! created.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classify::{AirQualityCategory, Bounds, RecordId, RegionRecord};
use crate::config::{FlyToConfig, LayerConfig, LayerKind};
use crate::map::{LayerSpec, LayerType, MapEvent, MapSurface, Paint, SceneFeature};

/// 8-bit RGB colour, `#rrggbb` in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rrggbb` or `rrggbb`
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::parse(&value).ok_or_else(|| format!("invalid colour '{}'", value))
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

fn hex(s: &str) -> Rgb {
    Rgb::parse(s).unwrap_or(Rgb(128, 128, 128))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    /// Position within the metric bounds, 0..=1
    pub at: f64,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryColor {
    pub category: String,
    pub color: Rgb,
}

/// How a record's fill colour is derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ColorRule {
    Fixed { color: Rgb },
    /// Linear interpolation between stops over the metric bounds
    Ramp { stops: Vec<ColorStop> },
    Categories { colors: Vec<CategoryColor>, fallback: Rgb },
}

impl ColorRule {
    pub fn color_for(&self, metric: f64, category: &str, bounds: &Bounds) -> Rgb {
        match self {
            ColorRule::Fixed { color } => *color,
            ColorRule::Ramp { stops } => {
                let t = bounds.fraction(metric);
                let Some(first) = stops.first() else {
                    return Rgb(128, 128, 128);
                };
                if t <= first.at {
                    return first.color;
                }
                for pair in stops.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    if t <= b.at {
                        let span = (b.at - a.at).max(f64::EPSILON);
                        return a.color.lerp(b.color, (t - a.at) / span);
                    }
                }
                stops.last().map_or(first.color, |s| s.color)
            }
            ColorRule::Categories { colors, fallback } => colors
                .iter()
                .find(|c| c.category == category)
                .map_or(*fallback, |c| c.color),
        }
    }
}

/// Visual style of one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub fill: ColorRule,
    pub fill_opacity: f64,
    /// Opacity of the hovered feature
    pub hover_opacity: f64,
    pub outline: Rgb,
    pub outline_width: f64,
    pub labels: bool,
    pub heatmap: bool,
    /// Extrude areas by metric × scale
    pub extrusion_scale: Option<f64>,
    /// Draw point features as circles with this radius
    pub circle_radius: Option<f64>,
    pub highlight: Rgb,
    pub highlight_width: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig::for_kind(LayerKind::Population)
    }
}

fn ramp(stops: &[(f64, &str)]) -> ColorRule {
    ColorRule::Ramp {
        stops: stops
            .iter()
            .map(|(at, color)| ColorStop { at: *at, color: hex(color) })
            .collect(),
    }
}

impl StyleConfig {
    /// Built-in palette for each layer kind
    pub fn for_kind(kind: LayerKind) -> Self {
        let base = StyleConfig {
            fill: ColorRule::Fixed { color: hex("#4292c6") },
            fill_opacity: 0.7,
            hover_opacity: 0.9,
            outline: hex("#ffffff"),
            outline_width: 1.0,
            labels: true,
            heatmap: false,
            extrusion_scale: None,
            circle_radius: None,
            highlight: hex("#ffff00"),
            highlight_width: 3.0,
        };

        match kind {
            LayerKind::Population => StyleConfig {
                fill: ramp(&[(0.0, "#c6dbef"), (0.5, "#4292c6"), (1.0, "#084594")]),
                outline: hex("#ff4d4d"),
                outline_width: 2.0,
                ..base
            },
            LayerKind::AirQuality => StyleConfig {
                fill: ColorRule::Categories {
                    colors: AirQualityCategory::ALL
                        .iter()
                        .zip(["#00e676", "#ffee58", "#ff9800", "#f44336", "#9c27b0"])
                        .map(|(c, color)| CategoryColor {
                            category: c.label().to_string(),
                            color: hex(color),
                        })
                        .collect(),
                    fallback: hex("#9e9e9e"),
                },
                fill_opacity: 0.8,
                extrusion_scale: Some(20.0),
                highlight_width: 4.0,
                ..base
            },
            LayerKind::Zoonosis => StyleConfig {
                fill: ramp(&[
                    (0.0, "#ffffcc"),
                    (1.0 / 3.0, "#fd8d3c"),
                    (2.0 / 3.0, "#f03b20"),
                    (1.0, "#bd0026"),
                ]),
                outline: hex("#000000"),
                outline_width: 0.5,
                heatmap: true,
                ..base
            },
            LayerKind::Waste => StyleConfig {
                fill: ColorRule::Fixed { color: hex("#ff0000") },
                fill_opacity: 0.8,
                hover_opacity: 1.0,
                labels: false,
                circle_radius: Some(6.0),
                ..base
            },
        }
    }
}

pub struct LayerRenderer {
    layer_id: String,
    style: StyleConfig,
    fly_to: FlyToConfig,
    point_layer: bool,
    /// Names of map resources this renderer created and must remove
    created_layers: Vec<String>,
    created_source: bool,
    bound: Vec<(String, MapEvent)>,
    highlighted: Option<RecordId>,
    hovered: Option<RecordId>,
}

impl LayerRenderer {
    pub fn new(layer: &LayerConfig, fly_to: FlyToConfig) -> Self {
        Self {
            layer_id: layer.id.clone(),
            style: layer.style(),
            fly_to,
            point_layer: layer.kind.is_point_layer(),
            created_layers: Vec::new(),
            created_source: false,
            bound: Vec::new(),
            highlighted: None,
            hovered: None,
        }
    }

    pub fn style(&self) -> &StyleConfig {
        &self.style
    }

    pub fn source_id(&self) -> String {
        format!("{}-source", self.layer_id)
    }

    pub fn highlight_layer_id(&self) -> String {
        format!("{}-highlight", self.layer_id)
    }

    /// The layer receiving click and hover events
    pub fn interactive_layer_id(&self) -> String {
        if self.point_layer {
            format!("{}-circle", self.layer_id)
        } else {
            format!("{}-fill", self.layer_id)
        }
    }

    /// Does this renderer own the named map layer?
    pub fn owns_layer(&self, layer_id: &str) -> bool {
        self.created_layers.iter().any(|l| l == layer_id)
            || (self.highlighted.is_some() && layer_id == self.highlight_layer_id())
    }

    pub fn is_active(&self) -> bool {
        !self.created_layers.is_empty() || self.created_source
    }

    /// Visual layers for this style, bottom first
    fn layer_specs(&self) -> Vec<LayerSpec> {
        let source = self.source_id();
        let spec = |suffix: &str, kind: LayerType, paint: Paint, opacity: f64, width: f64| LayerSpec {
            id: format!("{}-{}", self.layer_id, suffix),
            source: source.clone(),
            kind,
            paint,
            opacity,
            width,
            height_scale: None,
            filter: None,
        };
        let style = &self.style;
        let mut specs = Vec::new();

        if style.heatmap {
            specs.push(spec("heatmap", LayerType::Heatmap, Paint::Feature, 0.6, 30.0));
        }

        if let Some(radius) = style.circle_radius {
            specs.push(spec("pulse", LayerType::Circle, Paint::Feature, 0.3, radius * 2.0));
            specs.push(spec("circle", LayerType::Circle, Paint::Feature, style.fill_opacity, radius));
        } else {
            let mut fill = spec("fill", LayerType::Fill, Paint::Feature, style.fill_opacity, 0.0);
            if let Some(scale) = style.extrusion_scale {
                fill.kind = LayerType::FillExtrusion;
                fill.height_scale = Some(scale);
            }
            specs.push(fill);
            specs.push(spec("line", LayerType::Line, Paint::Fixed(style.outline), 1.0, style.outline_width));
        }

        if style.labels {
            specs.push(spec("label", LayerType::Symbol, Paint::Fixed(Rgb(0x33, 0x33, 0x33)), 1.0, 12.0));
        }
        specs
    }

    fn scene_features(&self, records: &[RegionRecord], bounds: &Bounds) -> Vec<SceneFeature> {
        records
            .iter()
            .map(|r| SceneFeature {
                id: r.id.clone(),
                name: r.name.clone(),
                metric: r.metric,
                category: r.category.clone(),
                weight: bounds.fraction(r.metric),
                fill: self.style.fill.color_for(r.metric, &r.category, bounds),
                centroid: r.centroid,
                geometry: r.geometry.clone(),
            })
            .collect()
    }

    /// Create or refresh this layer's source and visual layers
    pub fn activate(&mut self, map: &mut dyn MapSurface, records: &[RegionRecord], bounds: &Bounds) {
        let source = self.source_id();
        let features = self.scene_features(records, bounds);

        if map.has_source(&source) {
            map.set_source_data(&source, features);
            tracing::debug!(layer = %self.layer_id, "Updated source data in place");
        } else {
            map.add_source(&source, features);
            self.created_source = true;
        }

        for spec in self.layer_specs() {
            let id = spec.id.clone();
            if !map.has_layer(&id) && map.add_layer(spec) && !self.created_layers.contains(&id) {
                self.created_layers.push(id);
            }
        }

        let interactive = self.interactive_layer_id();
        for event in [MapEvent::Click, MapEvent::Hover] {
            if map.bind(&interactive, event) {
                self.bound.push((interactive.clone(), event));
            }
        }

        // The highlight sits on top; re-add it if the data changed underneath
        if let Some(id) = self.highlighted.clone() {
            if records.iter().any(|r| r.id == id) {
                self.highlight(map, Some(&id));
            } else {
                self.highlight(map, None);
            }
        }

        tracing::info!(layer = %self.layer_id, features = records.len(), "Layer rendered");
    }

    /// Remove everything `activate` created; a no-op when nothing was created
    pub fn deactivate(&mut self, map: &mut dyn MapSurface) {
        if !self.is_active() && self.highlighted.is_none() {
            return;
        }

        self.highlight(map, None);
        self.hover(map, None);

        for (layer, event) in self.bound.drain(..) {
            map.unbind(&layer, event);
        }
        for layer in self.created_layers.drain(..) {
            map.remove_layer(&layer);
        }
        if self.created_source {
            map.remove_source(&self.source_id());
            self.created_source = false;
        }

        tracing::info!(layer = %self.layer_id, "Layer removed");
    }

    /// Show exactly one highlighted feature, or none
    pub fn highlight(&mut self, map: &mut dyn MapSurface, id: Option<&RecordId>) {
        let layer_id = self.highlight_layer_id();
        if self.highlighted.take().is_some() || map.has_layer(&layer_id) {
            map.remove_layer(&layer_id);
        }

        let Some(id) = id else {
            return;
        };
        let added = map.add_layer(LayerSpec {
            id: layer_id,
            source: self.source_id(),
            kind: if self.point_layer { LayerType::Circle } else { LayerType::Line },
            paint: Paint::Fixed(self.style.highlight),
            opacity: 1.0,
            width: self.style.highlight_width,
            height_scale: None,
            filter: Some(id.clone()),
        });
        if added {
            self.highlighted = Some(id.clone());
        }
    }

    /// Transient opacity override on the hovered feature; `None` reverts it
    pub fn hover(&mut self, map: &mut dyn MapSurface, id: Option<&RecordId>) {
        if self.hovered.as_ref() == id {
            return;
        }
        let layer = self.interactive_layer_id();
        map.set_hover(&layer, id.map(|id| (id.clone(), self.style.hover_opacity)));
        self.hovered = id.cloned();
    }

    /// Animate the camera to the record's ring-vertex centroid
    pub fn fly_to(&self, map: &mut dyn MapSurface, record: &RegionRecord) -> bool {
        match record.centroid {
            Some(center) => {
                map.fly_to(center, self.fly_to);
                true
            }
            None => false,
        }
    }
}
