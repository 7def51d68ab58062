//! Geographic keys on a Z-order curve.
//!
//! Latitude and longitude are each quantized to 32 bits and interleaved
//! into a 64-bit Morton code, longitude on the even bits and latitude on
//! the odd bits. Points close on the globe tend to be close in key order,
//! but the curve has jumps, so a disc query is answered with a set of key
//! ranges that cover its bounding box plus a per-candidate distance check.
//!
//! ## Covering
//!
//! [`cover_radius`] walks the quadtree the curve induces, emitting every
//! cell that lies inside the bounding box or reaches the depth limit while
//! still intersecting it. Cells are visited in curve order, so the emitted
//! ranges are sorted and adjacent ones are merged.

use crate::error::{CodecError, CodecResult};
use std::f64::consts::FRAC_PI_2;

/// Mean Earth radius used for all distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Encoded width of a [`GeoKey`].
pub const GEO_KEY_LEN: usize = 8;

const GRID: f64 = 4_294_967_296.0; // 2^32
const MAX_LEVEL: u32 = 32;
/// Quadtree levels below the one whose cell matches the box size.
const EXTRA_LEVELS: u32 = 2;

/// A quantized point on the Z-order curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeoKey(u64);

impl GeoKey {
    /// Encodes a point.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidCoordinate`] unless `lat` is within
    /// `[-90, 90]` and `lon` within `[-180, 180]`.
    pub fn encode(lat: f64, lon: f64) -> CodecResult<Self> {
        check_coordinate(lat, lon)?;
        Ok(Self(interleave(quantize_lat(lat), quantize_lon(lon))))
    }

    /// Wraps a raw curve position.
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw curve position.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the centre of this key's grid cell as `(lat, lon)`.
    pub fn decode(self) -> (f64, f64) {
        let (lat_q, lon_q) = deinterleave(self.0);
        let lat = (f64::from(lat_q) + 0.5) / GRID * 180.0 - 90.0;
        let lon = (f64::from(lon_q) + 0.5) / GRID * 360.0 - 180.0;
        (lat, lon)
    }

    /// Big-endian bytes, which sort in curve order.
    pub fn to_bytes(self) -> [u8; GEO_KEY_LEN] {
        self.0.to_be_bytes()
    }

    /// Reads a key from the first [`GEO_KEY_LEN`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if `bytes` is too short.
    pub fn from_slice(bytes: &[u8]) -> CodecResult<Self> {
        let head: [u8; GEO_KEY_LEN] = bytes
            .get(..GEO_KEY_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(CodecError::Truncated)?;
        Ok(Self(u64::from_be_bytes(head)))
    }

    /// Great-circle distance in meters between two cell centres.
    pub fn distance_to(self, other: GeoKey) -> f64 {
        let (lat1, lon1) = self.decode();
        let (lat2, lon2) = other.decode();
        haversine_distance(lat1, lon1, lat2, lon2)
    }

    /// Key ranges covering every point within `meters` of this key.
    ///
    /// # Errors
    ///
    /// See [`cover_radius`].
    pub fn range_bounds(self, meters: f64) -> CodecResult<Vec<GeoRange>> {
        let (lat, lon) = self.decode();
        cover_radius(lat, lon, meters)
    }
}

/// An inclusive interval of curve positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoRange {
    /// First position in the range.
    pub start: u64,
    /// Last position in the range.
    pub end: u64,
}

impl GeoRange {
    /// Whether `key` falls inside this range.
    pub fn contains(&self, key: GeoKey) -> bool {
        (self.start..=self.end).contains(&key.0)
    }
}

/// A latitude/longitude box that does not cross the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BBox {
    /// Create a new bounding box.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Check if this bbox contains a point.
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Boxes bounding the disc of `meters` around a point.
    ///
    /// Returns two boxes when the disc crosses the antimeridian. A disc
    /// that reaches a pole spans every longitude.
    pub fn around(lat: f64, lon: f64, meters: f64) -> Vec<BBox> {
        let angular = meters / EARTH_RADIUS_METERS;
        let dlat = angular.to_degrees();
        let min_lat = lat - dlat;
        let max_lat = lat + dlat;

        if min_lat <= -90.0 || max_lat >= 90.0 || angular >= FRAC_PI_2 {
            return vec![BBox::new(min_lat.max(-90.0), max_lat.min(90.0), -180.0, 180.0)];
        }

        let dlon = (angular.sin() / lat.to_radians().cos()).asin().to_degrees();
        if dlon.is_nan() || dlon >= 180.0 {
            return vec![BBox::new(min_lat, max_lat, -180.0, 180.0)];
        }

        let (min_lon, max_lon) = (lon - dlon, lon + dlon);
        if min_lon < -180.0 {
            vec![
                BBox::new(min_lat, max_lat, -180.0, max_lon),
                BBox::new(min_lat, max_lat, min_lon + 360.0, 180.0),
            ]
        } else if max_lon > 180.0 {
            vec![
                BBox::new(min_lat, max_lat, -180.0, max_lon - 360.0),
                BBox::new(min_lat, max_lat, min_lon, 180.0),
            ]
        } else {
            vec![BBox::new(min_lat, max_lat, min_lon, max_lon)]
        }
    }
}

/// Sorted, non-overlapping key ranges covering the disc of `meters`
/// around a point.
///
/// The cover is conservative: it may include keys farther away than
/// `meters`, never fewer. Callers re-check candidates with
/// [`haversine_distance`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidCoordinate`] for an invalid centre and
/// [`CodecError::TypeMismatch`] for a negative or NaN distance.
pub fn cover_radius(lat: f64, lon: f64, meters: f64) -> CodecResult<Vec<GeoRange>> {
    check_coordinate(lat, lon)?;
    if meters.is_nan() || meters < 0.0 {
        return Err(CodecError::type_mismatch(
            "non-negative distance",
            meters.to_string(),
        ));
    }

    let mut ranges = Vec::new();
    for bbox in BBox::around(lat, lon, meters) {
        let cells = CellBox {
            lat_lo: quantize_lat(bbox.min_lat),
            lat_hi: quantize_lat(bbox.max_lat),
            lon_lo: quantize_lon(bbox.min_lon),
            lon_hi: quantize_lon(bbox.max_lon),
        };
        cells.cover(&mut ranges);
    }
    ranges.sort_by_key(|r| r.start);
    Ok(merge(ranges))
}

/// Haversine distance between two points in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

fn check_coordinate(lat: f64, lon: f64) -> CodecResult<()> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(CodecError::InvalidCoordinate { lat, lon })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(fraction: f64) -> u32 {
    (fraction * GRID).floor().clamp(0.0, f64::from(u32::MAX)) as u32
}

fn quantize_lat(lat: f64) -> u32 {
    quantize((lat + 90.0) / 180.0)
}

fn quantize_lon(lon: f64) -> u32 {
    quantize((lon + 180.0) / 360.0)
}

fn spread(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    (x | (x << 1)) & 0x5555_5555_5555_5555
}

#[allow(clippy::cast_possible_truncation)]
fn compact(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    ((x | (x >> 16)) & 0xFFFF_FFFF) as u32
}

fn interleave(lat_q: u32, lon_q: u32) -> u64 {
    (spread(lat_q) << 1) | spread(lon_q)
}

fn deinterleave(key: u64) -> (u32, u32) {
    (compact(key >> 1), compact(key))
}

/// A box in quantized grid units, bounds inclusive.
struct CellBox {
    lat_lo: u32,
    lat_hi: u32,
    lon_lo: u32,
    lon_hi: u32,
}

impl CellBox {
    fn cover(&self, out: &mut Vec<GeoRange>) {
        let extent = u64::from(self.lat_hi - self.lat_lo)
            .max(u64::from(self.lon_hi - self.lon_lo))
            + 1;
        let floor_log2 = 63 - extent.leading_zeros();
        let max_level = (MAX_LEVEL + EXTRA_LEVELS)
            .saturating_sub(floor_log2)
            .min(MAX_LEVEL);
        self.visit(0, 0, 0, max_level, out);
    }

    /// Visits the cell `(lat_cell, lon_cell)` at `level`, where a cell
    /// spans `2^(32 - level)` grid units per axis.
    fn visit(
        &self,
        level: u32,
        lat_cell: u64,
        lon_cell: u64,
        max_level: u32,
        out: &mut Vec<GeoRange>,
    ) {
        let shift = MAX_LEVEL - level;
        let lat_lo = lat_cell << shift;
        let lat_hi = ((lat_cell + 1) << shift) - 1;
        let lon_lo = lon_cell << shift;
        let lon_hi = ((lon_cell + 1) << shift) - 1;

        let (box_lat_lo, box_lat_hi) = (u64::from(self.lat_lo), u64::from(self.lat_hi));
        let (box_lon_lo, box_lon_hi) = (u64::from(self.lon_lo), u64::from(self.lon_hi));

        let disjoint = lat_lo > box_lat_hi
            || lat_hi < box_lat_lo
            || lon_lo > box_lon_hi
            || lon_hi < box_lon_lo;
        if disjoint {
            return;
        }

        let inside = lat_lo >= box_lat_lo
            && lat_hi <= box_lat_hi
            && lon_lo >= box_lon_lo
            && lon_hi <= box_lon_hi;
        if inside || level == max_level {
            out.push(cell_range(level, lat_cell, lon_cell));
            return;
        }

        // Children in curve order: latitude bit is the more significant.
        for dlat in 0..2 {
            for dlon in 0..2 {
                self.visit(
                    level + 1,
                    lat_cell * 2 + dlat,
                    lon_cell * 2 + dlon,
                    max_level,
                    out,
                );
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cell_range(level: u32, lat_cell: u64, lon_cell: u64) -> GeoRange {
    let shift = MAX_LEVEL - level;
    let start = if level == 0 {
        0
    } else {
        interleave((lat_cell << shift) as u32, (lon_cell << shift) as u32)
    };
    let span = (1u128 << (2 * shift)) - 1;
    GeoRange {
        start,
        end: (u128::from(start) + span) as u64,
    }
}

fn merge(ranges: Vec<GeoRange>) -> Vec<GeoRange> {
    let mut merged: Vec<GeoRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}
