//! Selection state machine
//!
//! `NoSelection -> Selected(r)` on a map or list click, `Selected(r) ->
//! Selected(r')` on a click elsewhere, back to `NoSelection` on close or when
//! the layer goes away. Transitions return the effects the caller applies, in
//! order; the old highlight is always cleared before the new one is added.

use serde::Serialize;

use crate::classify::{RecordId, RegionRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    NoSelection,
    Selected(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEffect {
    ClearHighlight(RecordId),
    Highlight(RecordId),
    FlyTo(RecordId),
    /// Small viewports force the side panel open
    OpenPanel,
}

#[derive(Debug, Default)]
pub struct SelectionController {
    state: Selection,
    small_viewport: bool,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&RecordId> {
        match &self.state {
            Selection::Selected(id) => Some(id),
            Selection::NoSelection => None,
        }
    }

    pub fn set_small_viewport(&mut self, small: bool) {
        self.small_viewport = small;
    }

    pub fn select(&mut self, id: RecordId) -> Vec<SelectionEffect> {
        let mut effects = Vec::new();
        match std::mem::take(&mut self.state) {
            Selection::Selected(old) if old == id => {
                // Same record again: keep the highlight, just re-centre
            }
            Selection::Selected(old) => {
                effects.push(SelectionEffect::ClearHighlight(old));
                effects.push(SelectionEffect::Highlight(id.clone()));
            }
            Selection::NoSelection => effects.push(SelectionEffect::Highlight(id.clone())),
        }
        effects.push(SelectionEffect::FlyTo(id.clone()));
        if self.small_viewport {
            effects.push(SelectionEffect::OpenPanel);
        }
        self.state = Selection::Selected(id);
        effects
    }

    pub fn deselect(&mut self) -> Vec<SelectionEffect> {
        match std::mem::take(&mut self.state) {
            Selection::Selected(old) => vec![SelectionEffect::ClearHighlight(old)],
            Selection::NoSelection => vec![],
        }
    }
}

/// Selection events exposed to the panel / legend UI and the HTTP API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerEvent {
    Select {
        layer: String,
        id: RecordId,
        name: String,
        metric: f64,
        category: String,
    },
    Deselect {
        layer: String,
    },
}

impl LayerEvent {
    pub fn select(layer: &str, record: &RegionRecord) -> Self {
        LayerEvent::Select {
            layer: layer.to_string(),
            id: record.id.clone(),
            name: record.name.clone(),
            metric: record.metric,
            category: record.category.clone(),
        }
    }
}
