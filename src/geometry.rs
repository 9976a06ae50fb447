//! Geometry helpers: GeoJSON conversion, centroids, hit tests

use geo::{BoundingRect, Contains, Coord, Geometry};

/// Convert a GeoJSON geometry, rejecting anything with non-finite coordinates
pub fn from_geojson(geometry: &geojson::Geometry) -> Option<Geometry<f64>> {
    let geom = Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
    let rect = geom.bounding_rect()?;
    let finite = [rect.min().x, rect.min().y, rect.max().x, rect.max().y]
        .iter()
        .all(|v| v.is_finite());
    finite.then_some(geom)
}

/// Camera target for a geometry: the arithmetic mean of its exterior ring
/// vertices (not an area-weighted centroid). Multipolygons average every
/// polygon's exterior ring together.
pub fn ring_centroid(geom: &Geometry<f64>) -> Option<Coord<f64>> {
    let coords: Vec<Coord<f64>> = match geom {
        Geometry::Point(p) => vec![p.0],
        Geometry::MultiPoint(mp) => mp.iter().map(|p| p.0).collect(),
        Geometry::LineString(ls) => ls.0.clone(),
        Geometry::Polygon(poly) => poly.exterior().0.clone(),
        Geometry::MultiPolygon(mp) => mp.iter().flat_map(|p| p.exterior().0.iter().copied()).collect(),
        _ => return None,
    };

    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sx, sy) = coords.iter().fold((0.0, 0.0), |(x, y), c| (x + c.x, y + c.y));
    Some(Coord { x: sx / n, y: sy / n })
}

/// Does `at` hit the geometry? Areas use containment, points a radius in degrees.
pub fn hits(geom: &Geometry<f64>, at: Coord<f64>, point_radius: f64) -> bool {
    match geom {
        Geometry::Point(p) => (p.x() - at.x).hypot(p.y() - at.y) <= point_radius,
        Geometry::MultiPoint(mp) => mp.iter().any(|p| (p.x() - at.x).hypot(p.y() - at.y) <= point_radius),
        other => other.contains(&at),
    }
}

/// Exterior rings as [lon, lat] pairs, for drawing
pub fn exterior_rings(geom: &Geometry<f64>) -> Vec<Vec<[f64; 2]>> {
    let ring = |ls: &geo::LineString<f64>| ls.0.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>();
    match geom {
        Geometry::Polygon(p) => vec![ring(p.exterior())],
        Geometry::MultiPolygon(mp) => mp.iter().map(|p| ring(p.exterior())).collect(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Point};

    #[test]
    fn test_centroid_is_vertex_mean() {
        // Closed ring: the repeated first vertex counts twice
        let poly: Geometry<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 0.0, y: 4.0),
        ]
        .into();
        let c = ring_centroid(&poly).unwrap();
        assert!((c.x - 1.6).abs() < 1e-9);
        assert!((c.y - 1.6).abs() < 1e-9);

        let pt: Geometry<f64> = Point::new(106.8, -6.2).into();
        assert_eq!(ring_centroid(&pt), Some(Coord { x: 106.8, y: -6.2 }));
    }

    #[test]
    fn test_hits() {
        let poly: Geometry<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]
        .into();
        assert!(hits(&poly, Coord { x: 1.0, y: 1.0 }, 0.0));
        assert!(!hits(&poly, Coord { x: 3.0, y: 1.0 }, 0.0));

        let pt: Geometry<f64> = Point::new(1.0, 1.0).into();
        assert!(hits(&pt, Coord { x: 1.005, y: 1.0 }, 0.01));
        assert!(!hits(&pt, Coord { x: 1.5, y: 1.0 }, 0.01));
    }

    #[test]
    fn test_from_geojson_rings() {
        let value: geojson::Geometry = serde_json::from_str(
            r#"{"type":"Polygon","coordinates":[[[106.7,-6.3],[106.9,-6.3],[106.9,-6.1],[106.7,-6.3]]]}"#,
        )
        .unwrap();
        let geom = from_geojson(&value).unwrap();
        assert_eq!(exterior_rings(&geom)[0].len(), 4);
        assert_eq!(exterior_rings(&geom)[0][1], [106.9, -6.3]);
        let pt: Geometry<f64> = Point::new(107.0, -6.0).into();
        assert!(exterior_rings(&pt).is_empty());
    }
}
