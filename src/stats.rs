//! Placeholder region statistics
//!
//! Deterministic demo numbers for the region card. The seed is the FNV-1a
//! 64-bit hash of the region's English name, fed to `StdRng`. The values are
//! stable per region and carry no meaning beyond filling the card.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::classify::Bounds;
use crate::region::Region;
use crate::render::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertLevel {
    Low,
    Moderate,
    High,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStats {
    pub region: Region,
    pub risk_score: u32,
    pub aqi_value: u32,
    pub monitoring_stations: u32,
    pub population_exposed: u32,
    pub alert_level: AlertLevel,
    pub trend: Trend,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a(text: &str) -> u64 {
    text.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

impl RegionStats {
    pub fn generate(region: Region) -> Self {
        let mut rng = StdRng::seed_from_u64(fnv1a(region.english()));
        let alert_level = *[AlertLevel::Low, AlertLevel::Moderate, AlertLevel::High, AlertLevel::Severe]
            .choose(&mut rng)
            .unwrap_or(&AlertLevel::Low);
        let trend = *[Trend::Improving, Trend::Stable, Trend::Worsening]
            .choose(&mut rng)
            .unwrap_or(&Trend::Stable);

        Self {
            region,
            risk_score: rng.gen_range(30..=85),
            aqi_value: rng.gen_range(50..=180),
            monitoring_stations: rng.gen_range(4..=12),
            population_exposed: rng.gen_range(150_000..=900_000),
            alert_level,
            trend,
        }
    }

    /// Green → amber → red over a 0-100 risk score
    pub fn risk_color(&self) -> Rgb {
        let scale = Bounds { min: 0.0, max: 100.0 };
        let t = scale.fraction(self.risk_score as f64);
        let (green, amber, red) = (Rgb(0x4c, 0xaf, 0x50), Rgb(0xff, 0xd7, 0x40), Rgb(0xff, 0x52, 0x52));
        if t <= 0.5 {
            green.lerp(amber, t * 2.0)
        } else {
            amber.lerp(red, (t - 0.5) * 2.0)
        }
    }
}
