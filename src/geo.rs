//! Coordinate helpers for the Greek dataset.
//!
//! The source survey digitized flood points in the Greek Grid (EPSG:2100,
//! GGRS87 transverse Mercator on GRS80). The map layer needs WGS84 degrees.
//! The GGRS87 to WGS84 datum shift is not applied; its effect is well below
//! the precision of the digitized points.

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const INVERSE_FLATTENING: f64 = 298.257_222_101;
const SCALE_FACTOR: f64 = 0.9996;
const CENTRAL_MERIDIAN_DEG: f64 = 24.0;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING: f64 = 0.0;

/// Latitude/longitude rectangle in WGS84 degrees, bounds inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl GeoBounds {
    /// Whether the point lies inside the rectangle.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Approximate bounding box of Greece.
pub const GREECE_BOUNDS: GeoBounds = GeoBounds {
    min_lat: 34.0,
    max_lat: 42.0,
    min_lon: 19.0,
    max_lon: 30.0,
};

/// Whether a WGS84 point falls inside [`GREECE_BOUNDS`].
pub fn within_greece(lat: f64, lon: f64) -> bool {
    GREECE_BOUNDS.contains(lat, lon)
}

/// Convert Greek Grid easting/northing (metres) to WGS84 `(latitude, longitude)` degrees.
///
/// Inverse transverse Mercator series (footpoint latitude form), accurate to
/// well under a metre across the country.
pub fn greek_grid_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let flattening = 1.0 / INVERSE_FLATTENING;
    let e2 = flattening * (2.0 - flattening);
    let ep2 = e2 / (1.0 - e2);
    let a = SEMI_MAJOR_AXIS;

    let easting = x - FALSE_EASTING;
    let arc = (y - FALSE_NORTHING) / SCALE_FACTOR;

    let mu = arc / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let root = (1.0 - e2).sqrt();
    let e1 = (1.0 - root) / (1.0 + root);
    let footpoint = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_fp, cos_fp) = footpoint.sin_cos();
    let tan_fp = footpoint.tan();
    let c1 = ep2 * cos_fp.powi(2);
    let t1 = tan_fp.powi(2);
    let denom = 1.0 - e2 * sin_fp.powi(2);
    let n1 = a / denom.sqrt();
    let r1 = a * (1.0 - e2) / denom.powf(1.5);
    let d = easting / (n1 * SCALE_FACTOR);

    let lat = footpoint
        - (n1 * tan_fp / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2) - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);
    let lon = CENTRAL_MERIDIAN_DEG.to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_fp;

    (lat.to_degrees(), lon.to_degrees())
}
