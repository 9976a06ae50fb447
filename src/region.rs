//! Canonical Jakarta municipality keys
//!
//! The page-level region selector speaks English ("East Jakarta"), the
//! datasets speak Indonesian ("Jakarta Timur"). Both resolve to one `Region`.

use serde::Serialize;
use std::fmt;

use crate::render::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Central,
    North,
    South,
    East,
    West,
}

impl Region {
    pub const ALL: [Region; 5] = [Region::Central, Region::North, Region::South, Region::East, Region::West];

    pub fn english(&self) -> &'static str {
        match self {
            Region::Central => "Central Jakarta",
            Region::North => "North Jakarta",
            Region::South => "South Jakarta",
            Region::East => "East Jakarta",
            Region::West => "West Jakarta",
        }
    }

    /// Name as used by the datasets
    pub fn kota(&self) -> &'static str {
        match self {
            Region::Central => "Jakarta Pusat",
            Region::North => "Jakarta Utara",
            Region::South => "Jakarta Selatan",
            Region::East => "Jakarta Timur",
            Region::West => "Jakarta Barat",
        }
    }

    /// Accent colour of the region card
    pub fn color(&self) -> Rgb {
        match self {
            Region::Central => Rgb(0xff, 0xa5, 0x00),
            Region::North => Rgb(0x3a, 0x86, 0xff),
            Region::South => Rgb(0x72, 0x09, 0xb7),
            Region::East => Rgb(0x43, 0x61, 0xee),
            Region::West => Rgb(0xf7, 0x25, 0x85),
        }
    }

    /// Resolve "East Jakarta", "jakarta timur", "Kota Adm. Jakarta Timur", "timur", "east"
    pub fn from_name(name: &str) -> Option<Region> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        Region::ALL.into_iter().find(|r| {
            let english = r.english().to_lowercase();
            let kota = r.kota().to_lowercase();
            let short_en = english.trim_end_matches(" jakarta");
            let short_id = kota.trim_start_matches("jakarta ");
            name == short_en || name == short_id || name.contains(&english) || name.contains(&kota)
        })
    }

    /// Does a dataset label (region name or city) refer to this region?
    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        label.contains(&self.kota().to_lowercase()) || label.contains(&self.english().to_lowercase())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.english())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Region::from_name("East Jakarta"), Some(Region::East));
        assert_eq!(Region::from_name("JAKARTA TIMUR"), Some(Region::East));
        assert_eq!(Region::from_name("Kota Adm. Jakarta Barat"), Some(Region::West));
        assert_eq!(Region::from_name("selatan"), Some(Region::South));
        assert_eq!(Region::from_name("north"), Some(Region::North));
        assert_eq!(Region::from_name("Bandung"), None);
        assert_eq!(Region::from_name(""), None);
    }

    #[test]
    fn test_matches_dataset_labels() {
        assert!(Region::Central.matches("KOTA ADM. JAKARTA PUSAT"));
        assert!(!Region::Central.matches("Jakarta Utara"));
        assert_eq!(Region::North.to_string(), "North Jakarta");
    }
}
