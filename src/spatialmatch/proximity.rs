use failure::Error;
use serde::{Deserialize, Serialize};

use crate::spatialmatch::common::*;

// spherical mercator runs out here
const MAX_LAT: f64 = 85.0511;

// the grid only carries tiles up to this zoom
pub const MAX_ZOOM: u16 = 16;

// flat-earth conversion used for small buffers
const MILES_PER_DEGREE: f64 = 69.;

/// A tile-space bounding box at a fixed zoom
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBbox {
    pub zoom: u16,
    pub min_x: u16,
    pub min_y: u16,
    pub max_x: u16,
    pub max_y: u16,
}

/// Project a lon/lat to integer tile coordinates at a zoom. Out-of-range
/// coordinates clamp to the edge of the projection.
pub fn project_to_tile_xy(center: [f64; 2], zoom: u16) -> Result<[u16; 3], Error> {
    if zoom > MAX_ZOOM {
        return Err(SpatialmatchError::ProjectionFailure {
            message: format!("zoom {} is beyond the tile pyramid", zoom),
        }
        .into());
    }
    let lon = center[0].max(-180.).min(180.);
    let lat = center[1].max(-MAX_LAT).min(MAX_LAT);

    let size = (1u32 << zoom) as f64;
    let sin = lat.to_radians().sin();
    let x = ((lon + 180.) / 360. * size).floor();
    let y = ((0.5 - ((1. + sin) / (1. - sin)).ln() / (4. * std::f64::consts::PI)) * size).floor();

    let max_tile = size - 1.;
    Ok([zoom, x.max(0.).min(max_tile) as u16, y.max(0.).min(max_tile) as u16])
}

/// Cover a geographic [w, s, e, n] bbox with the tile range it intersects
/// at a zoom
pub fn inside_tile(bbox: [f64; 4], zoom: u16) -> Result<TileBbox, Error> {
    if bbox[0] > bbox[2] || bbox[1] > bbox[3] {
        return Err(SpatialmatchError::InvalidOptions {
            message: format!("bbox {:?} has inverted corners", bbox),
        }
        .into());
    }
    // north edge maps to the smallest tile y
    let [_, min_x, min_y] = project_to_tile_xy([bbox[0], bbox[3]], zoom)?;
    let [_, max_x, max_y] = project_to_tile_xy([bbox[2], bbox[1]], zoom)?;
    Ok(TileBbox { zoom, min_x, min_y, max_x, max_y })
}

/// Intersect two [w, s, e, n] boxes
pub fn bbox_intersection(a: [f64; 4], b: [f64; 4]) -> Option<[f64; 4]> {
    let out = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    if out[0] > out[2] || out[1] > out[3] {
        None
    } else {
        Some(out)
    }
}

/// Buffer around a proximity point, in miles, on a flat approximation with
/// longitude scaled at the point's latitude
pub fn partial_number_bbox(proximity: [f64; 2], radius_miles: f64) -> [f64; 4] {
    let lat = proximity[1].max(-MAX_LAT).min(MAX_LAT);
    let lat_degrees = radius_miles / MILES_PER_DEGREE;
    let lon_degrees = radius_miles / (MILES_PER_DEGREE * lat.to_radians().cos());
    [
        proximity[0] - lon_degrees,
        lat - lat_degrees,
        proximity[0] + lon_degrees,
        lat + lat_degrees,
    ]
}

#[test]
fn project_to_tile_xy_test() {
    assert_eq!(
        project_to_tile_xy([0., 0.], 1).unwrap(),
        [1, 1, 1],
        "the origin lands in the se tile at zoom 1"
    );
    assert_eq!(
        project_to_tile_xy([-180., MAX_LAT], 1).unwrap(),
        [1, 0, 0],
        "the nw corner lands in the nw tile"
    );
    assert_eq!(
        project_to_tile_xy([-77.03, 38.89], 6).unwrap(),
        [6, 18, 24],
        "washington dc lands in the expected zoom 6 tile"
    );
    assert_eq!(
        project_to_tile_xy([500., 99.], 2).unwrap(),
        [2, 3, 0],
        "out-of-range coordinates clamp to the projection edge"
    );
    assert!(project_to_tile_xy([0., 0.], 17).is_err(), "zooms past the pyramid fail");
}

#[test]
fn inside_tile_test() {
    let world = inside_tile([-180., -85., 180., 85.], 0).unwrap();
    assert_eq!(
        world,
        TileBbox { zoom: 0, min_x: 0, min_y: 0, max_x: 0, max_y: 0 },
        "the whole world is the single zoom 0 tile"
    );

    let hemisphere = inside_tile([-180., 0., 0., 85.], 1).unwrap();
    assert_eq!(
        hemisphere,
        TileBbox { zoom: 1, min_x: 0, min_y: 0, max_x: 1, max_y: 1 },
        "a bbox touching the origin spans into the adjacent tiles"
    );

    assert!(inside_tile([10., 0., -10., 1.], 1).is_err(), "inverted corners are rejected");
}

#[test]
fn bbox_intersection_test() {
    assert_eq!(
        bbox_intersection([-10., -10., 10., 10.], [0., 0., 20., 20.]),
        Some([0., 0., 10., 10.]),
        "overlapping boxes intersect"
    );
    assert_eq!(
        bbox_intersection([-10., -10., -5., -5.], [0., 0., 20., 20.]),
        None,
        "disjoint boxes do not"
    );
    assert_eq!(
        bbox_intersection([-10., -10., 0., 0.], [0., 0., 20., 20.]),
        Some([0., 0., 0., 0.]),
        "touching edges intersect in a degenerate box"
    );
}

#[test]
fn partial_number_bbox_test() {
    let bbox = partial_number_bbox([0., 0.], PARTIAL_NUMBER_RADIUS);
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    assert!((width - height).abs() < 1e-9, "at the equator the buffer is square");
    assert!((height - 20. / 69.).abs() < 1e-9, "the buffer spans 10 miles each way");

    let northern = partial_number_bbox([0., 60.], PARTIAL_NUMBER_RADIUS);
    assert!(
        (northern[2] - northern[0]) > width,
        "longitude degrees stretch with latitude"
    );
}
