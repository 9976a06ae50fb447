//! The map page: one shared map and a pipeline per configured layer

use geo::Coord;
use serde::Serialize;

use crate::classify::RegionRecord;
use crate::config::Config;
use crate::error::LayerError;
use crate::fetch::DatasetFetcher;
use crate::layer::{FetchOutcome, FetchTicket, LayerPipeline, LayerState};
use crate::map::MapHandle;
use crate::region::Region;
use crate::selection::LayerEvent;
use crate::stats::RegionStats;

/// Records of every loaded layer that refer to one region
#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub region: Region,
    pub kota: &'static str,
    pub stats: RegionStats,
    pub layers: Vec<RegionLayer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionLayer {
    pub layer: String,
    pub records: Vec<RegionRecord>,
}

pub struct MapPage {
    map: MapHandle,
    pipelines: Vec<LayerPipeline>,
}

impl MapPage {
    pub fn new(config: &Config) -> Self {
        let map = MapHandle::new(&config.map);
        let pipelines = config
            .layers
            .iter()
            .map(|layer| LayerPipeline::new(layer.clone(), map.clone(), config.map.fly_to))
            .collect();
        Self { map, pipelines }
    }

    pub fn map(&self) -> &MapHandle {
        &self.map
    }

    pub fn pipelines(&self) -> &[LayerPipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, id: &str) -> Result<&LayerPipeline, LayerError> {
        self.pipelines
            .iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| LayerError::UnknownLayer(id.to_string()))
    }

    pub fn pipeline_mut(&mut self, id: &str) -> Result<&mut LayerPipeline, LayerError> {
        self.pipelines
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or_else(|| LayerError::UnknownLayer(id.to_string()))
    }

    pub fn begin_activate(&mut self, id: &str) -> Result<Option<FetchTicket>, LayerError> {
        Ok(self.pipeline_mut(id)?.begin_activate())
    }

    pub fn retry(&mut self, id: &str) -> Result<FetchTicket, LayerError> {
        Ok(self.pipeline_mut(id)?.retry())
    }

    /// Route a finished fetch back to its layer
    pub fn complete(&mut self, outcome: FetchOutcome) -> bool {
        match self.pipeline_mut(&outcome.layer_id) {
            Ok(pipeline) => pipeline.complete(outcome),
            Err(err) => {
                tracing::warn!("Dropping fetch outcome: {}", err);
                false
            }
        }
    }

    pub async fn activate(&mut self, id: &str, fetcher: &DatasetFetcher) -> Result<&LayerState, LayerError> {
        Ok(self.pipeline_mut(id)?.activate(fetcher).await)
    }

    pub fn deactivate(&mut self, id: &str) -> Result<Option<LayerEvent>, LayerError> {
        Ok(self.pipeline_mut(id)?.deactivate())
    }

    pub fn select(&mut self, id: &str, record: &str) -> Result<Option<LayerEvent>, LayerError> {
        Ok(self.pipeline_mut(id)?.select(record))
    }

    pub fn deselect(&mut self, id: &str) -> Result<Option<LayerEvent>, LayerError> {
        Ok(self.pipeline_mut(id)?.deselect())
    }

    /// Map click: the topmost active layer with a feature under the pointer wins
    pub fn click(&mut self, at: Coord<f64>, point_radius: f64) -> Option<LayerEvent> {
        let hit = self.map.lock().hit(at, crate::map::MapEvent::Click, point_radius)?;
        let pipeline = self.pipelines.iter_mut().find(|p| p.is_active() && p.owns(&hit.layer))?;
        pipeline.select(&hit.id)
    }

    pub fn hover(&mut self, at: Option<Coord<f64>>, point_radius: f64) {
        for pipeline in self.pipelines.iter_mut() {
            pipeline.hover(at, point_radius);
        }
    }

    pub fn set_small_viewport(&mut self, small: bool) {
        for pipeline in self.pipelines.iter_mut() {
            pipeline.set_small_viewport(small);
        }
    }

    /// True when any layer asked for the side panel since the last call
    pub fn take_panel_request(&mut self) -> bool {
        self.pipelines
            .iter_mut()
            .fold(false, |requested, p| p.take_panel_request() || requested)
    }

    /// Join every loaded layer's records against a region
    pub fn region_summary(&self, region: Region) -> RegionSummary {
        let layers = self
            .pipelines
            .iter()
            .filter(|p| p.state().loaded)
            .map(|p| RegionLayer {
                layer: p.id().to_string(),
                records: p
                    .state()
                    .records
                    .iter()
                    .filter(|r| {
                        region.matches(&r.name) || r.details.get("city").is_some_and(|c| region.matches(c))
                    })
                    .cloned()
                    .collect(),
            })
            .collect();

        RegionSummary {
            region,
            kota: region.kota(),
            stats: RegionStats::generate(region),
            layers,
        }
    }

    /// Tear down every layer, e.g. when leaving the page
    pub fn unmount(&mut self) {
        for pipeline in self.pipelines.iter_mut() {
            pipeline.deactivate();
        }
        tracing::debug!("Map page unmounted");
    }
}
