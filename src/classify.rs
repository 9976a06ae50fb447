//! Feature classifier
//!
//! Turns a raw FeatureCollection into sorted `RegionRecord`s with a derived
//! category and the metric bounds used for colour scaling.
//!
//! Features missing the required properties or carrying unusable geometry are
//! skipped, never fatal: downstream code only ever sees valid records. The
//! layer fails only when nothing survives (`EmptyDataset`) or when a required
//! property is absent from every feature (`SchemaMismatch`).

use geo::Geometry;
use geojson::{feature::Id, Feature, FeatureCollection, JsonValue};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{LayerConfig, LayerKind, LayerSchema, MetricRule};
use crate::error::LayerError;
use crate::geometry;

pub type RecordId = String;

/// A normalized per-locality summary derived from one feature
#[derive(Debug, Clone, Serialize)]
pub struct RegionRecord {
    pub id: RecordId,
    pub name: String,
    /// The layer's primary metric (population, ISPU, severity index, site density)
    pub metric: f64,
    /// Secondary numbers, e.g. cases / deaths / death_rate for zoonosis
    pub metrics: BTreeMap<String, f64>,
    pub category: String,
    pub address: Option<String>,
    pub kind: Option<String>,
    pub details: BTreeMap<String, String>,
    /// [lon, lat] mean of the exterior ring vertices
    pub centroid: Option<[f64; 2]>,
    #[serde(skip)]
    pub geometry: Geometry<f64>,
}

/// Metric range across all valid records; always `min < max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    /// Min/max of `values`, widened by ±1 when degenerate
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (min, max) = values
            .into_iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        if min == max {
            Some(Self { min: min - 1.0, max: max + 1.0 })
        } else {
            Some(Self { min, max })
        }
    }

    /// Position of `value` within the range, clamped to [0, 1]
    pub fn fraction(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn lerp(&self, t: f64) -> f64 {
        self.min + (self.max - self.min) * t
    }
}

/// ISPU air quality bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirQualityCategory {
    Good,
    Moderate,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AirQualityCategory {
    pub const ALL: [AirQualityCategory; 5] = [
        AirQualityCategory::Good,
        AirQualityCategory::Moderate,
        AirQualityCategory::Unhealthy,
        AirQualityCategory::VeryUnhealthy,
        AirQualityCategory::Hazardous,
    ];

    pub fn from_ispu(ispu: f64) -> Self {
        if ispu <= 60.0 {
            AirQualityCategory::Good
        } else if ispu <= 70.0 {
            AirQualityCategory::Moderate
        } else if ispu <= 80.0 {
            AirQualityCategory::Unhealthy
        } else if ispu <= 90.0 {
            AirQualityCategory::VeryUnhealthy
        } else {
            AirQualityCategory::Hazardous
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AirQualityCategory::Good => "Good",
            AirQualityCategory::Moderate => "Moderate",
            AirQualityCategory::Unhealthy => "Unhealthy",
            AirQualityCategory::VeryUnhealthy => "Very Unhealthy",
            AirQualityCategory::Hazardous => "Hazardous",
        }
    }

    /// Indonesian label used on the source data portal
    pub fn local_label(&self) -> &'static str {
        match self {
            AirQualityCategory::Good => "Baik",
            AirQualityCategory::Moderate => "Sedang",
            AirQualityCategory::Unhealthy => "Tidak Sehat",
            AirQualityCategory::VeryUnhealthy => "Sangat Tidak Sehat",
            AirQualityCategory::Hazardous => "Berbahaya",
        }
    }
}

const POPULATION_BANDS: &[&str] = &["Low", "Medium", "High"];
const SEVERITY_BANDS: &[&str] = &["Low", "Moderate", "High", "Critical"];
const DENSITY_BANDS: &[&str] = &["Sparse", "Moderate", "Dense"];

/// Pure mapping from a metric (and the dataset bounds) to a category label
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CategoryRule {
    /// Fixed ISPU thresholds 60 / 70 / 80 / 90
    Ispu,
    /// Equal-width bands over [min, max]
    Bands(&'static [&'static str]),
}

impl CategoryRule {
    pub fn for_kind(kind: LayerKind) -> Self {
        match kind {
            LayerKind::AirQuality => CategoryRule::Ispu,
            LayerKind::Population => CategoryRule::Bands(POPULATION_BANDS),
            LayerKind::Zoonosis => CategoryRule::Bands(SEVERITY_BANDS),
            LayerKind::Waste => CategoryRule::Bands(DENSITY_BANDS),
        }
    }

    pub fn categorize(&self, metric: f64, bounds: &Bounds) -> &'static str {
        match self {
            CategoryRule::Ispu => AirQualityCategory::from_ispu(metric).label(),
            CategoryRule::Bands(labels) => {
                let n = labels.len();
                let idx = ((bounds.fraction(metric) * n as f64).floor() as usize).min(n - 1);
                labels[idx]
            }
        }
    }

    /// Every label the rule can produce, lowest first
    pub fn labels(&self) -> Vec<&'static str> {
        match self {
            CategoryRule::Ispu => AirQualityCategory::ALL.iter().map(|c| c.label()).collect(),
            CategoryRule::Bands(labels) => labels.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    MetricDesc,
    NameAsc,
}

impl SortOrder {
    pub fn for_kind(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Waste => SortOrder::NameAsc,
            _ => SortOrder::MetricDesc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classified {
    pub records: Vec<RegionRecord>,
    pub bounds: Bounds,
    pub skipped: usize,
}

pub struct FeatureClassifier<'a> {
    layer_id: &'a str,
    schema: &'a LayerSchema,
    rule: CategoryRule,
    order: SortOrder,
}

impl<'a> FeatureClassifier<'a> {
    pub fn new(layer_id: &'a str, schema: &'a LayerSchema, rule: CategoryRule, order: SortOrder) -> Self {
        Self { layer_id, schema, rule, order }
    }

    pub fn for_layer(layer: &'a LayerConfig) -> Self {
        Self::new(
            &layer.id,
            &layer.schema,
            CategoryRule::for_kind(layer.kind),
            SortOrder::for_kind(layer.kind),
        )
    }

    pub fn classify(&self, collection: &FeatureCollection) -> Result<Classified, LayerError> {
        if collection.features.is_empty() {
            return Err(self.empty());
        }
        self.check_schema(&collection.features)?;

        let mut records = Vec::with_capacity(collection.features.len());
        let mut seen: HashSet<RecordId> = HashSet::new();
        let mut skipped = 0;

        for (index, feature) in collection.features.iter().enumerate() {
            match self.record_from(index, feature) {
                Some(record) if seen.insert(record.id.clone()) => records.push(record),
                Some(record) => {
                    tracing::warn!(layer = self.layer_id, id = %record.id, "Duplicate feature id, skipping");
                    skipped += 1;
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!(layer = self.layer_id, skipped, kept = records.len(), "Skipped invalid features");
        }

        if let MetricRule::SiteDensity { .. } = self.schema.metric {
            apply_site_density(&mut records);
        }

        let bounds = Bounds::from_values(records.iter().map(|r| r.metric)).ok_or_else(|| self.empty())?;

        for record in records.iter_mut() {
            record.category = self.rule.categorize(record.metric, &bounds).to_string();
        }

        // sort_by is stable: ties keep feature order
        match self.order {
            SortOrder::MetricDesc => {
                records.sort_by(|a, b| b.metric.partial_cmp(&a.metric).unwrap_or(Ordering::Equal))
            }
            SortOrder::NameAsc => records.sort_by_key(|r| r.name.to_lowercase()),
        }

        Ok(Classified { records, bounds, skipped })
    }

    fn empty(&self) -> LayerError {
        LayerError::EmptyDataset {
            layer: self.layer_id.to_string(),
        }
    }

    fn check_schema(&self, features: &[Feature]) -> Result<(), LayerError> {
        let mut required = vec![self.schema.name_field.as_str()];
        match &self.schema.metric {
            MetricRule::Field { field } => required.push(field),
            MetricRule::Severity { cases_field, .. } => required.push(cases_field),
            MetricRule::SiteDensity { .. } => {}
        }

        for field in required {
            let present = features
                .iter()
                .any(|f| f.properties.as_ref().is_some_and(|p| p.contains_key(field)));
            if !present {
                return Err(LayerError::SchemaMismatch {
                    layer: self.layer_id.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    fn record_from(&self, index: usize, feature: &Feature) -> Option<RegionRecord> {
        let props = feature.properties.as_ref()?;
        let name = text_of(props.get(&self.schema.name_field)?)?;
        let geometry = geometry::from_geojson(feature.geometry.as_ref()?)?;

        let mut metrics = BTreeMap::new();
        let mut details = BTreeMap::new();

        let metric = match &self.schema.metric {
            MetricRule::Field { field } => number_of(props.get(field)?)?,
            MetricRule::Severity { cases_field, deaths_field } => {
                let cases = number_of(props.get(cases_field)?)?;
                let deaths = props.get(deaths_field).and_then(number_of).unwrap_or(0.0);
                let death_rate = death_rate(cases, deaths);
                metrics.insert("cases".to_string(), cases);
                metrics.insert("deaths".to_string(), deaths);
                metrics.insert("death_rate".to_string(), death_rate);
                severity_index(cases, death_rate)
            }
            MetricRule::SiteDensity { address_field } => {
                let address = props.get(address_field).and_then(text_of);
                details.insert("city".to_string(), city_from_address(address.as_deref()));
                0.0
            }
        };

        for field in &self.schema.detail_fields {
            if let Some(value) = props.get(field).and_then(text_of) {
                details.insert(field.clone(), value);
            }
        }

        let id = match &feature.id {
            Some(Id::String(s)) => s.clone(),
            Some(Id::Number(n)) => n.to_string(),
            None => format!("{}-{}", self.layer_id, index),
        };

        Some(RegionRecord {
            id,
            name,
            metric,
            metrics,
            category: String::new(),
            address: self.schema.address_field.as_ref().and_then(|f| props.get(f)).and_then(text_of),
            kind: self.schema.type_field.as_ref().and_then(|f| props.get(f)).and_then(text_of),
            details,
            centroid: geometry::ring_centroid(&geometry).map(|c| [c.x, c.y]),
            geometry,
        })
    }
}

/// deaths / cases × 100, zero when there are no cases
pub fn death_rate(cases: f64, deaths: f64) -> f64 {
    if cases > 0.0 {
        deaths / cases * 100.0
    } else {
        0.0
    }
}

/// cases × (1 + deathRate / 50): weights high-fatality regions upward
pub fn severity_index(cases: f64, death_rate: f64) -> f64 {
    cases * (1.0 + death_rate / 50.0)
}

/// City from the last comma-separated segment of an address
pub fn city_from_address(address: Option<&str>) -> String {
    address
        .and_then(|a| a.rsplit(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

fn apply_site_density(records: &mut [RegionRecord]) {
    let mut per_city: HashMap<String, usize> = HashMap::new();
    for record in records.iter() {
        if let Some(city) = record.details.get("city") {
            *per_city.entry(city.clone()).or_default() += 1;
        }
    }
    for record in records.iter_mut() {
        let count = record.details.get("city").and_then(|c| per_city.get(c)).copied().unwrap_or(1);
        record.metric = count as f64;
    }
}

/// Finite number from a JSON number or numeric string
fn number_of(value: &JsonValue) -> Option<f64> {
    let n = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Non-empty display text from a JSON string or number
fn text_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    pub(crate) fn square(id: serde_json::Value, x: f64, props: serde_json::Value) -> serde_json::Value {
        json!({
            "type": "Feature",
            "id": id,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0], [x, 0.0]]]
            },
            "properties": props
        })
    }

    pub(crate) fn collection(features: Vec<serde_json::Value>) -> FeatureCollection {
        serde_json::from_value(json!({ "type": "FeatureCollection", "features": features })).unwrap()
    }

    pub(crate) fn air_quality_collection(values: &[f64]) -> FeatureCollection {
        let names = ["Jakarta Selatan", "Jakarta Pusat", "Jakarta Barat", "Jakarta Timur", "Jakarta Utara"];
        collection(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    square(
                        json!(i + 1),
                        i as f64,
                        json!({ "wilayah": names[i % names.len()], "data_udara_final_max": v }),
                    )
                })
                .collect(),
        )
    }

    fn layer(id: &str) -> LayerConfig {
        Config::jakarta_default().get_layer(id).unwrap().clone()
    }

    #[test]
    fn test_ispu_scenario() {
        let aq = layer("air-quality");
        let classified = FeatureClassifier::for_layer(&aq)
            .classify(&air_quality_collection(&[55.0, 65.0, 75.0, 85.0, 95.0]))
            .unwrap();

        // Sorted by ISPU descending, so read categories back in input order
        let mut by_metric: Vec<_> = classified.records.iter().collect();
        by_metric.sort_by(|a, b| a.metric.partial_cmp(&b.metric).unwrap());
        let categories: Vec<&str> = by_metric.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, ["Good", "Moderate", "Unhealthy", "Very Unhealthy", "Hazardous"]);
        assert_eq!(classified.records[0].metric, 95.0);
    }

    #[test]
    fn test_ispu_thresholds_are_inclusive() {
        assert_eq!(AirQualityCategory::from_ispu(60.0), AirQualityCategory::Good);
        assert_eq!(AirQualityCategory::from_ispu(60.5), AirQualityCategory::Moderate);
        assert_eq!(AirQualityCategory::from_ispu(90.0), AirQualityCategory::VeryUnhealthy);
        assert_eq!(AirQualityCategory::Hazardous.local_label(), "Berbahaya");
    }

    #[test]
    fn test_zoonosis_severity() {
        let zoo = layer("zoonosis");
        let fc = collection(vec![
            square(json!("jt"), 0.0, json!({ "Kota": "Jakarta Timur", "zoonosis_jumlah_kasus": 58, "zoonosis_jumlah_kematian": 38 })),
            square(json!("js"), 1.0, json!({ "Kota": "Jakarta Selatan", "zoonosis_jumlah_kasus": "288", "zoonosis_jumlah_kematian": null })),
            square(json!("ju"), 2.0, json!({ "Kota": "Jakarta Utara", "zoonosis_jumlah_kasus": 0 })),
        ]);
        let classified = FeatureClassifier::for_layer(&zoo).classify(&fc).unwrap();

        let timur = classified.records.iter().find(|r| r.id == "jt").unwrap();
        assert!((timur.metrics["death_rate"] - 65.517).abs() < 0.01);
        // 58 × (1 + 65.517 / 50)
        assert!((timur.metric - 133.99).abs() < 0.05);

        let selatan = classified.records.iter().find(|r| r.id == "js").unwrap();
        assert_eq!(selatan.metrics["deaths"], 0.0);
        assert_eq!(selatan.metric, 288.0);

        let utara = classified.records.iter().find(|r| r.id == "ju").unwrap();
        assert_eq!(utara.metrics["death_rate"], 0.0);
        assert_eq!(utara.category, "Low");
        assert_eq!(classified.records[0].id, "js");
        assert_eq!(classified.records[0].category, "Critical");
    }

    #[test]
    fn test_skips_invalid_features_and_bounds_hold() {
        let pop = layer("population");
        let fc = collection(vec![
            square(json!(1), 0.0, json!({ "nama_kab_kota": "A", "jumlah_penduduk": 100 })),
            square(json!(2), 1.0, json!({ "nama_kab_kota": "B" })),
            square(json!(3), 2.0, json!({ "nama_kab_kota": "C", "jumlah_penduduk": "n/a" })),
            square(json!(4), 3.0, json!({ "jumlah_penduduk": 50 })),
            json!({ "type": "Feature", "id": 5, "geometry": null, "properties": { "nama_kab_kota": "E", "jumlah_penduduk": 70 } }),
            square(json!(6), 5.0, json!({ "nama_kab_kota": "F", "jumlah_penduduk": 300 })),
        ]);
        let classified = FeatureClassifier::for_layer(&pop).classify(&fc).unwrap();

        assert_eq!(classified.records.len(), 2);
        assert_eq!(classified.skipped, 4);
        assert!(classified.bounds.min < classified.bounds.max);
        for r in &classified.records {
            assert!(r.metric.is_finite());
            assert!(classified.bounds.min <= r.metric && r.metric <= classified.bounds.max);
        }
        assert_eq!(classified.records[0].name, "F");
    }

    #[test]
    fn test_degenerate_bounds_are_widened() {
        let aq = layer("air-quality");
        let classified = FeatureClassifier::for_layer(&aq)
            .classify(&air_quality_collection(&[70.0, 70.0]))
            .unwrap();
        assert_eq!(classified.bounds, Bounds { min: 69.0, max: 71.0 });
    }

    #[test]
    fn test_stable_sort_and_synthesized_ids() {
        let pop = layer("population");
        let fc = collection(vec![
            json!({ "type": "Feature", "geometry": { "type": "Point", "coordinates": [0.0, 0.0] },
                    "properties": { "nama_kab_kota": "first", "jumlah_penduduk": 10 } }),
            json!({ "type": "Feature", "geometry": { "type": "Point", "coordinates": [1.0, 0.0] },
                    "properties": { "nama_kab_kota": "second", "jumlah_penduduk": 10 } }),
            json!({ "type": "Feature", "geometry": { "type": "Point", "coordinates": [2.0, 0.0] },
                    "properties": { "nama_kab_kota": "top", "jumlah_penduduk": 20 } }),
        ]);
        let classified = FeatureClassifier::for_layer(&pop).classify(&fc).unwrap();
        let ids: Vec<&str> = classified.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["population-2", "population-0", "population-1"]);
    }

    #[test]
    fn test_schema_mismatch_and_empty() {
        let aq = layer("air-quality");
        let fc = collection(vec![square(json!(1), 0.0, json!({ "wilayah": "A", "ispu": 50 }))]);
        let err = FeatureClassifier::for_layer(&aq).classify(&fc).unwrap_err();
        assert_eq!(
            err,
            LayerError::SchemaMismatch {
                layer: "air-quality".to_string(),
                field: "data_udara_final_max".to_string()
            }
        );

        let fc = collection(vec![square(json!(1), 0.0, json!({ "wilayah": "A", "data_udara_final_max": "bad" }))]);
        let err = FeatureClassifier::for_layer(&aq).classify(&fc).unwrap_err();
        assert!(matches!(err, LayerError::EmptyDataset { .. }));

        let err = FeatureClassifier::for_layer(&aq).classify(&collection(vec![])).unwrap_err();
        assert!(matches!(err, LayerError::EmptyDataset { .. }));
    }

    #[test]
    fn test_waste_site_density() {
        let waste = layer("waste");
        let site = |id: u32, name: &str, address: Option<&str>| {
            json!({ "type": "Feature", "id": id,
                    "geometry": { "type": "Point", "coordinates": [106.8, -6.2] },
                    "properties": { "nama_tps": name, "full_address": address, "jenis_tps": "TPS 3R" } })
        };
        let fc = collection(vec![
            site(1, "TPS Tebet", Some("Jl. Tebet Raya, Jakarta Selatan")),
            site(2, "TPS Cilandak", Some("Jl. Fatmawati, Jakarta Selatan")),
            site(3, "TPS Ancol", Some("Jl. Lodan, Jakarta Utara")),
            site(4, "TPS Misteri", None),
        ]);
        let classified = FeatureClassifier::for_layer(&waste).classify(&fc).unwrap();

        let names: Vec<&str> = classified.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["TPS Ancol", "TPS Cilandak", "TPS Misteri", "TPS Tebet"]);
        let tebet = classified.records.iter().find(|r| r.id == "1").unwrap();
        assert_eq!(tebet.metric, 2.0);
        assert_eq!(tebet.details["city"], "Jakarta Selatan");
        assert_eq!(tebet.kind.as_deref(), Some("TPS 3R"));
        let misteri = classified.records.iter().find(|r| r.id == "4").unwrap();
        assert_eq!(misteri.details["city"], "Unknown");
    }

    #[test]
    fn test_band_edges() {
        let rule = CategoryRule::for_kind(LayerKind::Zoonosis);
        let bounds = Bounds { min: 0.0, max: 100.0 };
        assert_eq!(rule.categorize(0.0, &bounds), "Low");
        assert_eq!(rule.categorize(25.0, &bounds), "Moderate");
        assert_eq!(rule.categorize(74.9, &bounds), "High");
        assert_eq!(rule.categorize(100.0, &bounds), "Critical");
        assert_eq!(rule.labels().len(), 4);
    }
}
