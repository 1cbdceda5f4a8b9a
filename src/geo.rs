//! Geographic coordinate reconstruction.
//!
//! Detections live in padded-image pixel space. Converting them to
//! latitude/longitude takes three steps: undo the padding that was added
//! before tiling, apply the raster's affine geotransform to get projected
//! coordinates, then convert from the image's UTM zone to WGS84.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::types::Boat;

/// WGS84 ellipsoid constants and the UTM scale factor.
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING: f64 = 10_000_000.0;

/// Sidecar metadata describing the raster an image's labels came from.
///
/// Written alongside the label files as `metadata.json`, carrying the
/// values the imagery vendor embeds in the GeoTIFF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Raw raster width in pixels, before padding.
    pub width: u32,
    /// Raw raster height in pixels, before padding.
    pub height: u32,
    /// EPSG code of the raster's coordinate reference system.
    pub epsg: u32,
    /// GDAL-order affine coefficients `[c, a, b, f, d, e]`.
    pub geotransform: [f64; 6],
}

impl ImageMeta {
    /// Load `metadata.json` from an image's label directory, if present.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join("metadata.json");
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        let meta: ImageMeta = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse metadata: {}", path.display()))?;
        Ok(Some(meta))
    }

    pub fn transform(&self) -> GeoTransform {
        GeoTransform::new(self.geotransform)
    }
}

/// Affine mapping between raster pixel indices and projected coordinates,
/// in GDAL coefficient order `[c, a, b, f, d, e]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    coeffs: [f64; 6],
}

impl GeoTransform {
    pub fn new(coeffs: [f64; 6]) -> Self {
        Self { coeffs }
    }

    /// Projected coordinates of the center of pixel `(x, y)`.
    pub fn pixel_to_coord(&self, x: f64, y: f64) -> (f64, f64) {
        let [c, a, b, f, d, e] = self.coeffs;
        let xp = a * x + b * y + a * 0.5 + b * 0.5 + c;
        let yp = d * x + e * y + d * 0.5 + e * 0.5 + f;
        (xp, yp)
    }

    /// Pixel indices of the projected point, inverse of [`pixel_to_coord`].
    ///
    /// Solves the full 2x2 system, so it holds for rotated rasters too.
    ///
    /// [`pixel_to_coord`]: GeoTransform::pixel_to_coord
    pub fn coord_to_pixel(&self, xp: f64, yp: f64) -> Result<(f64, f64)> {
        let [c, a, b, f, d, e] = self.coeffs;
        let det = a * e - b * d;
        if det == 0.0 {
            bail!("Geotransform is singular: {:?}", self.coeffs);
        }
        let rx = xp - c - a * 0.5 - b * 0.5;
        let ry = yp - f - d * 0.5 - e * 0.5;
        Ok(((e * rx - b * ry) / det, (a * ry - d * rx) / det))
    }
}

/// Padding applied to each edge of a raster before tiling.
///
/// The raster is first padded up to a multiple of the stride, split
/// evenly between the opposing edges, then every edge gains a fixed
/// `tile_size - stride` margin so border pixels are seen by as many
/// tiles as interior ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Padding {
    pub fn for_image(width: u32, height: u32, tile_size: u32, stride: u32) -> Self {
        let pad = tile_size - stride;
        let width_padding = width.div_ceil(stride) * stride - width;
        let height_padding = height.div_ceil(stride) * stride - height;
        Self {
            left: width_padding / 2 + pad,
            right: width_padding.div_ceil(2) + pad,
            top: height_padding / 2 + pad,
            bottom: height_padding.div_ceil(2) + pad,
        }
    }
}

/// Central meridian of a UTM zone, in degrees.
fn central_meridian(zone: u32) -> f64 {
    f64::from(zone - 1) * 6.0 - 180.0 + 3.0
}

/// Decompose an EPSG code into a UTM zone and hemisphere.
///
/// Accepts 326xx (northern) and 327xx (southern) codes.
fn utm_zone_from_epsg(epsg: u32) -> Result<(u32, bool)> {
    let (base, southern) = match epsg {
        32601..=32660 => (32600, false),
        32701..=32760 => (32700, true),
        _ => bail!("Unsupported EPSG code for UTM conversion: {}", epsg),
    };
    Ok((epsg - base, southern))
}

/// Convert UTM easting/northing to `(longitude, latitude)` in degrees.
///
/// Inverse transverse Mercator with the standard series expansion,
/// accurate to well under a meter inside a zone.
pub fn utm_to_latlong(easting: f64, northing: f64, zone: u32, southern: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);

    let x = easting - UTM_FALSE_EASTING;
    let y = if southern { northing - UTM_FALSE_NORTHING } else { northing };

    // Footpoint latitude from the meridional arc.
    let m = y / UTM_K0;
    let mu = m
        / (WGS84_A
            * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1.powi(2);
    let t1 = tan_phi1.powi(2);
    let n1 = WGS84_A / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2)
                    - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);
    let long = (d
        - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
            * d.powi(5)
            / 120.0)
        / cos_phi1;

    (
        central_meridian(zone) + long.to_degrees(),
        lat.to_degrees(),
    )
}

/// Rewrite boat positions from padded-image pixels to longitude/latitude.
///
/// EPSG 4326 rasters already carry degrees through the geotransform and
/// skip the UTM step.
pub fn boats_to_latlong(
    boats: &mut [Boat],
    meta: &ImageMeta,
    tile_size: u32,
    stride: u32,
) -> Result<()> {
    let padding = Padding::for_image(meta.width, meta.height, tile_size, stride);
    let transform = meta.transform();
    let utm = match meta.epsg {
        4326 => None,
        code => Some(utm_zone_from_epsg(code)?),
    };
    debug!(
        "Converting {} boat(s) with EPSG {} (padding left={} top={})",
        boats.len(),
        meta.epsg,
        padding.left,
        padding.top
    );

    for boat in boats {
        let x = boat.x - f64::from(padding.left);
        let y = boat.y - f64::from(padding.top);
        let (xp, yp) = transform.pixel_to_coord(x, y);
        let (long, lat) = match utm {
            Some((zone, southern)) => utm_to_latlong(xp, yp, zone, southern),
            None => (xp, yp),
        };
        boat.x = long;
        boat.y = lat;
    }
    Ok(())
}
