//! Shared map surface
//!
//! One `MapScene` per page, shared by every layer through a cloneable
//! `MapHandle`. Layers never assume anything about each other's resources:
//! they check names before creating and remove only what they created.

use geo::{Coord, Geometry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::classify::RecordId;
use crate::config::{FlyToConfig, MapConfig};
use crate::geometry;
use crate::render::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerType {
    Fill,
    FillExtrusion,
    Line,
    Symbol,
    Circle,
    Heatmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MapEvent {
    Click,
    Hover,
}

/// Where a visual layer takes its colour from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Paint {
    /// Per-feature colour resolved by the renderer
    Feature,
    Fixed(Rgb),
}

/// A feature as stored in a map source
#[derive(Debug, Clone, Serialize)]
pub struct SceneFeature {
    pub id: RecordId,
    pub name: String,
    pub metric: f64,
    pub category: String,
    /// Metric position within the layer bounds, 0..=1
    pub weight: f64,
    pub fill: Rgb,
    pub centroid: Option<[f64; 2]>,
    #[serde(skip)]
    pub geometry: Geometry<f64>,
}

/// A named visual layer drawn from a source
#[derive(Debug, Clone, Serialize)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub kind: LayerType,
    pub paint: Paint,
    pub opacity: f64,
    /// Line width or circle radius, in pixels
    pub width: f64,
    /// fill-extrusion height = metric × scale
    pub height_scale: Option<f64>,
    /// Only draw the feature with this id
    pub filter: Option<RecordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Camera {
    /// [lon, lat]
    pub center: [f64; 2],
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
}

#[derive(Debug, Clone, Copy)]
struct Flight {
    from: Camera,
    to: Camera,
    started: Instant,
    duration: Duration,
}

/// Result of a hit test against bound layers
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub layer: String,
    pub source: String,
    pub id: RecordId,
}

/// Operations a layer may perform against the shared map
pub trait MapSurface {
    fn has_source(&self, id: &str) -> bool;
    /// Returns false when a source with that name already exists
    fn add_source(&mut self, id: &str, features: Vec<SceneFeature>) -> bool;
    /// Replace the data of an existing source in place
    fn set_source_data(&mut self, id: &str, features: Vec<SceneFeature>) -> bool;
    fn remove_source(&mut self, id: &str) -> bool;

    fn has_layer(&self, id: &str) -> bool;
    /// Returns false when a layer with that name already exists
    fn add_layer(&mut self, layer: LayerSpec) -> bool;
    fn remove_layer(&mut self, id: &str) -> bool;

    /// Register an interaction handler; false when already registered
    fn bind(&mut self, layer_id: &str, event: MapEvent) -> bool;
    fn unbind(&mut self, layer_id: &str, event: MapEvent) -> bool;

    /// Transient opacity override for one feature of a layer
    fn set_hover(&mut self, layer_id: &str, hover: Option<(RecordId, f64)>);

    fn fly_to(&mut self, center: [f64; 2], fly: FlyToConfig);
}

/// In-memory retained map: sources, ordered layers, handlers, camera
#[derive(Debug)]
pub struct MapScene {
    sources: HashMap<String, Vec<SceneFeature>>,
    layers: Vec<LayerSpec>,
    handlers: HashSet<(String, MapEvent)>,
    hover: HashMap<String, (RecordId, f64)>,
    camera: Camera,
    flight: Option<Flight>,
    camera_revision: u64,
}

impl MapScene {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            sources: HashMap::new(),
            layers: Vec::new(),
            handlers: HashSet::new(),
            hover: HashMap::new(),
            camera: Camera {
                center: config.center,
                zoom: config.zoom,
                pitch: 0.0,
                bearing: 0.0,
            },
            flight: None,
            camera_revision: 0,
        }
    }

    /// Layers in draw order, bottom first
    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    #[cfg(test)]
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    pub fn source(&self, id: &str) -> Option<&[SceneFeature]> {
        self.sources.get(id).map(|v| v.as_slice())
    }

    #[cfg(test)]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    #[cfg(test)]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_bound(&self, layer_id: &str, event: MapEvent) -> bool {
        self.handlers.contains(&(layer_id.to_string(), event))
    }

    /// Opacity for a feature, honouring a hover override
    pub fn opacity_of(&self, layer: &LayerSpec, id: &str) -> f64 {
        match self.hover.get(&layer.id) {
            Some((hovered, opacity)) if hovered == id => *opacity,
            _ => layer.opacity,
        }
    }

    /// Bumped by every `fly_to`, so a viewer knows when to move its view
    pub fn camera_revision(&self) -> u64 {
        self.camera_revision
    }

    /// Features a layer actually draws, after its filter
    pub fn visible_features<'a>(&'a self, layer: &'a LayerSpec) -> impl Iterator<Item = &'a SceneFeature> + 'a {
        self.sources
            .get(&layer.source)
            .into_iter()
            .flatten()
            .filter(move |f| layer.filter.as_ref().map_or(true, |id| &f.id == id))
    }

    /// Topmost bound layer feature under `at`
    pub fn hit(&self, at: Coord<f64>, event: MapEvent, point_radius: f64) -> Option<Hit> {
        self.layers
            .iter()
            .rev()
            .filter(|l| self.is_bound(&l.id, event))
            .find_map(|layer| {
                self.visible_features(layer)
                    .find(|f| geometry::hits(&f.geometry, at, point_radius))
                    .map(|f| Hit {
                        layer: layer.id.clone(),
                        source: layer.source.clone(),
                        id: f.id.clone(),
                    })
            })
    }

    /// Settled camera, ignoring any flight in progress
    pub fn camera(&self) -> Camera {
        self.flight.map(|f| f.to).unwrap_or(self.camera)
    }

    pub fn is_flying(&self) -> bool {
        self.flight.is_some()
    }

    /// Camera at `now`, finishing the flight once its duration has elapsed
    pub fn advance(&mut self, now: Instant) -> Camera {
        let Some(flight) = self.flight else {
            return self.camera;
        };

        let elapsed = now.saturating_duration_since(flight.started);
        if elapsed >= flight.duration {
            self.camera = flight.to;
            self.flight = None;
            return self.camera;
        }

        let t = elapsed.as_secs_f64() / flight.duration.as_secs_f64();
        // ease-in-out
        let t = t * t * (3.0 - 2.0 * t);
        let lerp = |a: f64, b: f64| a + (b - a) * t;
        Camera {
            center: [
                lerp(flight.from.center[0], flight.to.center[0]),
                lerp(flight.from.center[1], flight.to.center[1]),
            ],
            zoom: lerp(flight.from.zoom, flight.to.zoom),
            pitch: lerp(flight.from.pitch, flight.to.pitch),
            bearing: lerp(flight.from.bearing, flight.to.bearing),
        }
    }

}

impl MapSurface for MapScene {
    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, features: Vec<SceneFeature>) -> bool {
        if self.has_source(id) {
            return false;
        }
        self.sources.insert(id.to_string(), features);
        true
    }

    fn set_source_data(&mut self, id: &str, features: Vec<SceneFeature>) -> bool {
        match self.sources.get_mut(id) {
            Some(data) => {
                *data = features;
                true
            }
            None => false,
        }
    }

    fn remove_source(&mut self, id: &str) -> bool {
        self.sources.remove(id).is_some()
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.id == id)
    }

    fn add_layer(&mut self, layer: LayerSpec) -> bool {
        if self.has_layer(&layer.id) {
            return false;
        }
        self.layers.push(layer);
        true
    }

    fn remove_layer(&mut self, id: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        if self.layers.len() == before {
            return false;
        }
        self.hover.remove(id);
        true
    }

    fn bind(&mut self, layer_id: &str, event: MapEvent) -> bool {
        self.handlers.insert((layer_id.to_string(), event))
    }

    fn unbind(&mut self, layer_id: &str, event: MapEvent) -> bool {
        self.handlers.remove(&(layer_id.to_string(), event))
    }

    fn set_hover(&mut self, layer_id: &str, hover: Option<(RecordId, f64)>) {
        match hover {
            Some(h) => self.hover.insert(layer_id.to_string(), h),
            None => self.hover.remove(layer_id),
        };
    }

    fn fly_to(&mut self, center: [f64; 2], fly: FlyToConfig) {
        let now = Instant::now();
        let from = self.advance(now);
        let to = Camera {
            center,
            zoom: fly.zoom,
            pitch: fly.pitch,
            bearing: fly.bearing,
        };
        self.flight = Some(Flight {
            from,
            to,
            started: now,
            duration: Duration::from_millis(fly.duration_ms),
        });
        self.camera_revision += 1;
    }
}

/// Cloneable handle to the page's single map, injected into every layer
#[derive(Debug, Clone)]
pub struct MapHandle(Arc<Mutex<MapScene>>);

impl MapHandle {
    pub fn new(config: &MapConfig) -> Self {
        Self(Arc::new(Mutex::new(MapScene::new(config))))
    }

    pub fn lock(&self) -> MutexGuard<'_, MapScene> {
        // A panic mid-mutation leaves at worst a half-updated scene; keep drawing it
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Point};

    fn feature(id: &str, geometry: Geometry<f64>) -> SceneFeature {
        SceneFeature {
            id: id.to_string(),
            name: id.to_uppercase(),
            metric: 1.0,
            category: "Low".to_string(),
            weight: 0.0,
            fill: Rgb(0, 0, 0),
            centroid: geometry::ring_centroid(&geometry).map(|c| [c.x, c.y]),
            geometry,
        }
    }

    fn layer(id: &str, source: &str, kind: LayerType) -> LayerSpec {
        LayerSpec {
            id: id.to_string(),
            source: source.to_string(),
            kind,
            paint: Paint::Feature,
            opacity: 0.7,
            width: 1.0,
            height_scale: None,
            filter: None,
        }
    }

    #[test]
    fn test_check_before_create() {
        let mut scene = MapScene::new(&MapConfig::default());
        assert!(scene.add_source("a", vec![]));
        assert!(!scene.add_source("a", vec![]));
        assert!(scene.add_layer(layer("a-fill", "a", LayerType::Fill)));
        assert!(!scene.add_layer(layer("a-fill", "a", LayerType::Fill)));
        assert!(scene.bind("a-fill", MapEvent::Click));
        assert!(!scene.bind("a-fill", MapEvent::Click));
        assert_eq!(scene.layer_ids(), ["a-fill"]);

        assert!(scene.remove_layer("a-fill"));
        assert!(!scene.remove_layer("a-fill"));
        assert!(scene.remove_source("a"));
        assert!(!scene.set_source_data("a", vec![]));
    }

    #[test]
    fn test_hit_only_bound_layers_topmost_first() {
        let mut scene = MapScene::new(&MapConfig::default());
        let square: Geometry<f64> = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)].into();
        scene.add_source("areas", vec![feature("r1", square)]);
        scene.add_source("sites", vec![feature("s1", Point::new(1.0, 1.0).into())]);
        scene.add_layer(layer("areas-fill", "areas", LayerType::Fill));
        scene.add_layer(layer("sites-circle", "sites", LayerType::Circle));

        let at = Coord { x: 1.0, y: 1.0 };
        assert_eq!(scene.hit(at, MapEvent::Click, 0.01), None);

        scene.bind("areas-fill", MapEvent::Click);
        assert_eq!(scene.hit(at, MapEvent::Click, 0.01).unwrap().id, "r1");

        scene.bind("sites-circle", MapEvent::Click);
        let hit = scene.hit(at, MapEvent::Click, 0.01).unwrap();
        assert_eq!(hit.layer, "sites-circle");
        assert_eq!(hit.id, "s1");
        assert_eq!(scene.hit(at, MapEvent::Hover, 0.01), None);
    }

    #[test]
    fn test_flight_settles_on_target() {
        let mut scene = MapScene::new(&MapConfig::default());
        let fly = FlyToConfig::default();
        assert_eq!(scene.camera_revision(), 0);
        scene.fly_to([106.9, -6.2], fly);
        assert!(scene.is_flying());
        assert_eq!(scene.camera().zoom, 12.0);
        assert_eq!(scene.camera_revision(), 1);

        let later = Instant::now() + Duration::from_millis(fly.duration_ms + 10);
        let camera = scene.advance(later);
        assert_eq!(camera.center, [106.9, -6.2]);
        assert_eq!(camera.pitch, 60.0);
        assert_eq!(camera.bearing, 30.0);
        assert!(!scene.is_flying());

        // Data changes leave the view alone
        scene.add_source("a", vec![]);
        assert_eq!(scene.camera_revision(), 1);
    }

    #[test]
    fn test_hover_override() {
        let mut scene = MapScene::new(&MapConfig::default());
        let spec = layer("a-fill", "a", LayerType::Fill);
        scene.add_layer(spec.clone());
        scene.set_hover("a-fill", Some(("r1".to_string(), 1.0)));
        assert_eq!(scene.opacity_of(&spec, "r1"), 1.0);
        assert_eq!(scene.opacity_of(&spec, "r2"), 0.7);
        scene.set_hover("a-fill", None);
        assert_eq!(scene.opacity_of(&spec, "r1"), 0.7);
    }
}
