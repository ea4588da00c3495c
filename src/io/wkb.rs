//! Minimal WKB reading for building footprints.
//!
//! The building store keeps footprints in a `geometry_wkb` binary column.
//! Only the 2-D Polygon and MultiPolygon types are needed; anything else is
//! rejected.

use std::io::{Cursor, Read};

use geo::{Coord, LineString, MultiPolygon, Polygon};
use thiserror::Error;

const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_LE: u8 = 1;

/// Errors encountered while decoding WKB geometries
#[derive(Debug, Error)]
pub enum WkbError {
    #[error("truncated WKB while reading {0}")]
    Truncated(&'static str),
    #[error("unsupported WKB geometry type {0}")]
    UnsupportedType(u32),
    #[error("polygon without rings")]
    EmptyPolygon,
}

struct WkbCursor<'a> {
    inner: Cursor<&'a [u8]>,
    little_endian: bool,
}

impl<'a> WkbCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            inner: Cursor::new(bytes),
            little_endian: true,
        }
    }

    fn byte_order(&mut self) -> Result<(), WkbError> {
        let mut b = [0u8; 1];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| WkbError::Truncated("byte order"))?;
        self.little_endian = b[0] == WKB_LE;
        Ok(())
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, WkbError> {
        let mut b = [0u8; 4];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| WkbError::Truncated(what))?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self, what: &'static str) -> Result<f64, WkbError> {
        let mut b = [0u8; 8];
        self.inner
            .read_exact(&mut b)
            .map_err(|_| WkbError::Truncated(what))?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn ring(&mut self) -> Result<LineString<f64>, WkbError> {
        let n = self.u32("ring length")? as usize;
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            let x = self.f64("x coordinate")?;
            let y = self.f64("y coordinate")?;
            coords.push(Coord { x, y });
        }
        Ok(LineString::from(coords))
    }

    fn polygon_body(&mut self) -> Result<Polygon<f64>, WkbError> {
        let rings = self.u32("ring count")?;
        if rings == 0 {
            return Err(WkbError::EmptyPolygon);
        }
        let exterior = self.ring()?;
        let interiors = (1..rings)
            .map(|_| self.ring())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    fn header(&mut self) -> Result<u32, WkbError> {
        self.byte_order()?;
        // Strip EWKB flags (SRID/Z/M bits), keep the base type
        Ok(self.u32("geometry type")? & 0x0000_ffff)
    }
}

/// Decode a WKB Polygon or MultiPolygon into a MultiPolygon.
pub fn multipolygon_from_wkb(bytes: &[u8]) -> Result<MultiPolygon<f64>, WkbError> {
    let mut cur = WkbCursor::new(bytes);
    match cur.header()? {
        WKB_POLYGON => Ok(MultiPolygon(vec![cur.polygon_body()?])),
        WKB_MULTIPOLYGON => {
            let n = cur.u32("polygon count")?;
            let mut polygons = Vec::with_capacity(n as usize);
            for _ in 0..n {
                match cur.header()? {
                    WKB_POLYGON => polygons.push(cur.polygon_body()?),
                    other => return Err(WkbError::UnsupportedType(other)),
                }
            }
            Ok(MultiPolygon(polygons))
        }
        other => Err(WkbError::UnsupportedType(other)),
    }
}
