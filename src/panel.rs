//! Side panel binding
//!
//! Everything here is a pure function of the layer state: the filtered list,
//! the legend, and the detail rows of the selected record.

use serde::Serialize;
use std::collections::HashSet;

use crate::classify::{AirQualityCategory, Bounds, CategoryRule, RecordId, RegionRecord};
use crate::config::{LayerConfig, LayerKind};
use crate::layer::LayerState;
use crate::render::{ColorRule, Rgb, StyleConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelEntry {
    pub id: RecordId,
    pub name: String,
    pub subtitle: Option<String>,
    pub metric: f64,
    pub metric_label: String,
    pub category: String,
    pub color: Rgb,
    pub selected: bool,
}

/// Case-insensitive substring match on name, address and type
pub fn matches(record: &RegionRecord, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    [Some(&record.name), record.address.as_ref(), record.kind.as_ref()]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&query))
}

/// The list view: records in layer order, filtered by `query`.
///
/// Area layers list each locality once even when several features share its
/// name; the selected record stands in for its name group.
pub fn entries(layer: &LayerConfig, state: &LayerState, style: &StyleConfig, query: &str) -> Vec<PanelEntry> {
    let Some(bounds) = state.bounds else {
        return vec![];
    };
    let selected = state.selected_record();
    let mut listed: HashSet<String> = HashSet::new();
    state
        .records
        .iter()
        .filter(|r| matches(r, query))
        .filter(|r| {
            if layer.kind.is_point_layer() {
                return true;
            }
            let key = r.name.to_lowercase();
            if selected.is_some_and(|s| s.id != r.id && s.name.to_lowercase() == key) {
                return false;
            }
            listed.insert(key)
        })
        .map(|r| PanelEntry {
            id: r.id.clone(),
            name: r.name.clone(),
            subtitle: subtitle(layer.kind, r),
            metric: r.metric,
            metric_label: format_metric(layer.kind, r.metric),
            category: r.category.clone(),
            color: style.fill.color_for(r.metric, &r.category, &bounds),
            selected: state.selected.as_ref() == Some(&r.id),
        })
        .collect()
}

fn subtitle(kind: LayerKind, record: &RegionRecord) -> Option<String> {
    match kind {
        LayerKind::Waste => match (&record.kind, record.details.get("city")) {
            (Some(kind), Some(city)) => Some(format!("{} · {}", kind, city)),
            (Some(kind), None) => Some(kind.clone()),
            (None, city) => city.cloned(),
        },
        _ => Some(record.category.clone()),
    }
}

pub fn format_metric(kind: LayerKind, value: f64) -> String {
    match kind {
        LayerKind::Population => format!("{} people", group_thousands(value.round() as i64)),
        LayerKind::AirQuality => format!("ISPU {}", value.round()),
        LayerKind::Zoonosis => format!("severity {:.1}", value),
        LayerKind::Waste => format!("{} sites in city", value.round()),
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendItem {
    pub label: String,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub title: String,
    pub items: Vec<LegendItem>,
}

impl Legend {
    /// Legend for a layer; range-based layers need the loaded bounds
    pub fn for_layer(layer: &LayerConfig, style: &StyleConfig, bounds: Option<&Bounds>) -> Option<Legend> {
        let items = match (&style.fill, layer.kind) {
            (ColorRule::Categories { colors, .. }, LayerKind::AirQuality) => AirQualityCategory::ALL
                .iter()
                .zip(colors)
                .map(|(c, color)| LegendItem {
                    label: format!("{} ({})", c.label(), c.local_label()),
                    color: color.color,
                })
                .collect(),
            (ColorRule::Categories { colors, .. }, _) => colors
                .iter()
                .map(|c| LegendItem {
                    label: c.category.clone(),
                    color: c.color,
                })
                .collect(),
            (ColorRule::Fixed { color }, _) => vec![LegendItem {
                label: layer.title.clone(),
                color: *color,
            }],
            (ColorRule::Ramp { .. }, kind) => {
                let bounds = bounds?;
                let rule = &style.fill;
                let labels = CategoryRule::for_kind(kind).labels();
                let n = labels.len() as f64;
                labels
                    .iter()
                    .enumerate()
                    .map(|(i, label)| {
                        let lo = bounds.lerp(i as f64 / n);
                        let hi = bounds.lerp((i + 1) as f64 / n);
                        let mid = (lo + hi) / 2.0;
                        LegendItem {
                            label: format!("{} ({:.0} – {:.0})", label, lo, hi),
                            color: rule.color_for(mid, label, bounds),
                        }
                    })
                    .collect()
            }
        };
        Some(Legend {
            title: layer.title.clone(),
            items,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub label: String,
    pub value: String,
}

fn row(label: &str, value: impl ToString) -> DetailRow {
    DetailRow {
        label: label.to_string(),
        value: value.to_string(),
    }
}

/// Popup / detail card rows for a selected record
pub fn details(kind: LayerKind, record: &RegionRecord) -> Vec<DetailRow> {
    let detail = |key: &str| record.details.get(key).cloned().unwrap_or_else(|| "-".to_string());
    let metric = |key: &str| record.metrics.get(key).copied().unwrap_or(0.0);

    let mut rows = vec![row("Name", &record.name)];
    match kind {
        LayerKind::Population => {
            rows.push(row("Population", format_metric(kind, record.metric)));
            rows.push(row("Density class", &record.category));
        }
        LayerKind::AirQuality => {
            let category = AirQualityCategory::from_ispu(record.metric);
            rows.push(row("ISPU", record.metric));
            rows.push(row("Status", format!("{} ({})", category.label(), category.local_label())));
            for (key, label) in [
                ("pm_sepuluh", "PM10"),
                ("pm_duakomalima", "PM2.5"),
                ("sulfur_dioksida", "SO2"),
                ("karbon_monoksida", "CO"),
                ("ozon", "O3"),
                ("nitrogen_dioksida", "NO2"),
                ("parameter_pencemar_kritis", "Critical pollutant"),
                ("tanggal", "Date"),
            ] {
                rows.push(row(label, detail(&format!("data_udara_final_{}", key))));
            }
        }
        LayerKind::Zoonosis => {
            rows.push(row("Cases", metric("cases")));
            rows.push(row("Deaths", metric("deaths")));
            rows.push(row("Death rate", format!("{:.1}%", metric("death_rate"))));
            rows.push(row("Severity index", format!("{:.1}", record.metric)));
            rows.push(row("Severity", &record.category));
            rows.push(row("Period", detail("zoonosis_periode_data")));
        }
        LayerKind::Waste => {
            rows.push(row("Type", record.kind.as_deref().unwrap_or("-")));
            rows.push(row("Address", record.address.as_deref().unwrap_or("-")));
            rows.push(row("City", detail("city")));
            rows.push(row("District", detail("kecamatan")));
            if let Some([lon, lat]) = record.centroid {
                rows.push(row("Coordinates", format!("{:.6}, {:.6}", lat, lon)));
            }
        }
    }
    rows
}
