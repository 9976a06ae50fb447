//! Configuration loader - YAML layer manifest + .env secrets

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::render::StyleConfig;

/// Main configuration loaded from layers.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub layers: Vec<LayerConfig>,
}

/// Initial camera and the fixed fly-to used when a region is selected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// [lon, lat]
    pub center: [f64; 2],
    pub zoom: f64,
    pub fly_to: FlyToConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyToConfig {
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
}

/// A single map layer definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: String,
    pub title: String,
    pub kind: LayerKind,
    pub url: String,
    #[serde(default)]
    pub fallback_url: Option<String>,
    pub schema: LayerSchema,
    #[serde(default)]
    pub style: Option<StyleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    Population,
    AirQuality,
    Zoonosis,
    Waste,
}

/// Which feature properties a layer reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSchema {
    pub name_field: String,
    pub metric: MetricRule,
    #[serde(default)]
    pub address_field: Option<String>,
    #[serde(default)]
    pub type_field: Option<String>,
    /// Extra properties copied verbatim into the record for the detail card
    #[serde(default)]
    pub detail_fields: Vec<String>,
}

/// How the numeric metric of a record is derived from its properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum MetricRule {
    /// A numeric property (numeric strings are accepted)
    Field { field: String },
    /// cases × (1 + deathRate / 50); missing deaths count as zero
    Severity {
        cases_field: String,
        deaths_field: String,
    },
    /// Number of sites sharing the city named by the last segment of the address
    SiteDensity { address_field: String },
}

/// Secrets loaded from .env
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub data_dir: String,
    pub log_dir: String,
    pub port: u16,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [106.8456, -6.2088],
            zoom: 11.0,
            fly_to: FlyToConfig::default(),
        }
    }
}

impl Default for FlyToConfig {
    fn default() -> Self {
        Self {
            zoom: 12.0,
            pitch: 60.0,
            bearing: 30.0,
            duration_ms: 1500,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            retries: 1,
            backoff_ms: 1000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LayerKind {
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Population => "population",
            LayerKind::AirQuality => "air-quality",
            LayerKind::Zoonosis => "zoonosis",
            LayerKind::Waste => "waste",
        }
    }

    /// Waste sites are points, everything else is an administrative area
    pub fn is_point_layer(&self) -> bool {
        matches!(self, LayerKind::Waste)
    }
}

impl LayerConfig {
    /// Style from the manifest, or the kind's default palette
    pub fn style(&self) -> StyleConfig {
        self.style
            .clone()
            .unwrap_or_else(|| StyleConfig::for_kind(self.kind))
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Get layer by ID
    pub fn get_layer(&self, id: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Built-in manifest for the four Jakarta layers
    pub fn jakarta_default() -> Self {
        const CDN: &str = "https://cdn.jsdelivr.net/gh/riyqnn/geojson-data@main";

        let layers = vec![
            LayerConfig {
                id: "population".to_string(),
                title: "Population".to_string(),
                kind: LayerKind::Population,
                url: format!("{}/jumlah_penduduk.json", CDN),
                fallback_url: Some("data/jumlah_penduduk.json".to_string()),
                schema: LayerSchema {
                    name_field: "nama_kab_kota".to_string(),
                    metric: MetricRule::Field {
                        field: "jumlah_penduduk".to_string(),
                    },
                    address_field: None,
                    type_field: None,
                    detail_fields: vec![],
                },
                style: None,
            },
            LayerConfig {
                id: "air-quality".to_string(),
                title: "Air Quality Index".to_string(),
                kind: LayerKind::AirQuality,
                url: format!("{}/data_udara.json", CDN),
                fallback_url: Some("data/data_udara.json".to_string()),
                schema: LayerSchema {
                    name_field: "wilayah".to_string(),
                    metric: MetricRule::Field {
                        field: "data_udara_final_max".to_string(),
                    },
                    address_field: None,
                    type_field: None,
                    detail_fields: [
                        "data_udara_final_pm_sepuluh",
                        "data_udara_final_pm_duakomalima",
                        "data_udara_final_sulfur_dioksida",
                        "data_udara_final_karbon_monoksida",
                        "data_udara_final_ozon",
                        "data_udara_final_nitrogen_dioksida",
                        "data_udara_final_parameter_pencemar_kritis",
                        "data_udara_final_tanggal",
                    ]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                },
                style: None,
            },
            LayerConfig {
                id: "zoonosis".to_string(),
                title: "Zoonotic Diseases".to_string(),
                kind: LayerKind::Zoonosis,
                url: "http://localhost:8080/geoserver/penyebaran/ows?service=WFS&version=1.0.0&request=GetFeature&typeName=penyebaran%3Azoonosis&maxFeatures=50&outputFormat=application%2Fjson".to_string(),
                fallback_url: Some("data/zoonosis.json".to_string()),
                schema: LayerSchema {
                    name_field: "Kota".to_string(),
                    metric: MetricRule::Severity {
                        cases_field: "zoonosis_jumlah_kasus".to_string(),
                        deaths_field: "zoonosis_jumlah_kematian".to_string(),
                    },
                    address_field: None,
                    type_field: None,
                    detail_fields: vec!["zoonosis_periode_data".to_string()],
                },
                style: None,
            },
            LayerConfig {
                id: "waste".to_string(),
                title: "Waste Sites".to_string(),
                kind: LayerKind::Waste,
                url: format!("{}/sampah2.json", CDN),
                fallback_url: Some("data/sampah2.json".to_string()),
                schema: LayerSchema {
                    name_field: "nama_tps".to_string(),
                    metric: MetricRule::SiteDensity {
                        address_field: "full_address".to_string(),
                    },
                    address_field: Some("full_address".to_string()),
                    type_field: Some("jenis_tps".to_string()),
                    detail_fields: vec!["kecamatan".to_string()],
                },
                style: None,
            },
        ];

        Config {
            map: MapConfig::default(),
            fetch: FetchConfig::default(),
            layers,
        }
    }
}

impl Secrets {
    /// Load secrets from .env file
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Secrets {
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3000),
        }
    }
}
