use geo::{
    BooleanOps, Coord, Distance, Geodesic, Haversine, LineString, MultiLineString, Point, Rect,
    Simplify,
};
use geojson::{GeoJson, Value};
use std::f64::consts::PI;
use thiserror::Error;

/// Spherical mercator earth radius in meters (EPSG:3857).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    Geojson(#[from] geojson::Error),
    #[error("unsupported geometry type, expected LineString or MultiLineString")]
    UnsupportedType,
}

#[derive(Debug, Error, PartialEq)]
pub enum BboxError {
    #[error("no valid map area specified, check the bbox parameter")]
    Missing,
    #[error("invalid coordinates given for the map area, check the bbox parameter")]
    Invalid,
}

pub fn wgs84_to_mercator(lon: f64, lat: f64) -> Coord<f64> {
    Coord {
        x: EARTH_RADIUS_M * lon.to_radians(),
        y: EARTH_RADIUS_M * (lat.to_radians() / 2.0 + PI / 4.0).tan().ln(),
    }
}

pub fn mercator_to_wgs84(coord: Coord<f64>) -> (f64, f64) {
    let lon = (coord.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// A map area in WGS84 degrees, as given by a `bbox` request parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bbox {
    /// Parse `min_lon,min_lat,max_lon,max_lat`. Out-of-range values are
    /// clamped to the world bounds, a degenerate area is an error.
    pub fn parse(raw: &str) -> Result<Self, BboxError> {
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 4 {
            return Err(BboxError::Missing);
        }

        let mut coords = [0f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part.trim().parse().map_err(|_| BboxError::Invalid)?;
        }

        let bbox = Bbox {
            min_lon: coords[0].clamp(-180.0, 180.0),
            min_lat: coords[1].clamp(-90.0, 90.0),
            max_lon: coords[2].clamp(-180.0, 180.0),
            max_lat: coords[3].clamp(-90.0, 90.0),
        };

        if bbox.min_lon >= bbox.max_lon || bbox.min_lat >= bbox.max_lat {
            return Err(BboxError::Invalid);
        }
        Ok(bbox)
    }

    pub fn to_mercator_rect(&self) -> Rect<f64> {
        Rect::new(
            wgs84_to_mercator(self.min_lon, self.min_lat),
            wgs84_to_mercator(self.max_lon, self.max_lat),
        )
    }
}

/// Douglas-Peucker tolerance (mercator meters) for full-route display
/// geometry, stepped by the original point count.
pub fn display_tolerance(num_points: usize) -> Option<f64> {
    if num_points > 50_000 {
        Some(100.0)
    } else if num_points > 10_000 {
        Some(20.0)
    } else if num_points > 1_000 {
        Some(10.0)
    } else if num_points > 300 {
        Some(5.0)
    } else {
        None
    }
}

/// Tolerance for bbox-clipped overview geometry. Kicks in once the viewport
/// spans more than a tenth of a degree of latitude and grows cubically.
pub fn box_tolerance(bbox: &Bbox) -> Option<f64> {
    let ydiff = 10.0 * (bbox.max_lat - bbox.min_lat);
    (ydiff > 1.0).then(|| ydiff * ydiff * ydiff / 2.0)
}

/// Route geometry as stored: one or more lines in mercator meters.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteGeometry {
    Line(LineString<f64>),
    MultiLine(MultiLineString<f64>),
}

impl RouteGeometry {
    pub fn from_lines(mut lines: Vec<LineString<f64>>) -> Option<Self> {
        match lines.len() {
            0 => None,
            1 => Some(RouteGeometry::Line(lines.remove(0))),
            _ => Some(RouteGeometry::MultiLine(MultiLineString::new(lines))),
        }
    }

    pub fn from_geojson(raw: &str) -> Result<Self, GeometryError> {
        let geojson: GeoJson = raw.parse()?;
        let GeoJson::Geometry(geometry) = geojson else {
            return Err(GeometryError::UnsupportedType);
        };
        match geo::Geometry::<f64>::try_from(geometry)? {
            geo::Geometry::LineString(line) => Ok(RouteGeometry::Line(line)),
            geo::Geometry::MultiLineString(lines) => Ok(RouteGeometry::MultiLine(lines)),
            _ => Err(GeometryError::UnsupportedType),
        }
    }

    /// GeoJSON in storage (mercator) coordinates.
    pub fn to_geojson_string(&self) -> String {
        let value = match self {
            RouteGeometry::Line(line) => Value::from(line),
            RouteGeometry::MultiLine(lines) => Value::from(lines),
        };
        GeoJson::Geometry(geojson::Geometry::new(value)).to_string()
    }

    /// GeoJSON geometry converted to WGS84 for responses.
    pub fn to_wgs84_geojson(&self) -> geojson::Geometry {
        let value = match self {
            RouteGeometry::Line(line) => Value::from(&line_to_wgs84(line)),
            RouteGeometry::MultiLine(lines) => {
                let converted: Vec<LineString<f64>> = lines.iter().map(line_to_wgs84).collect();
                Value::from(&MultiLineString::new(converted))
            }
        };
        geojson::Geometry::new(value)
    }

    pub fn num_points(&self) -> usize {
        match self {
            RouteGeometry::Line(line) => line.0.len(),
            RouteGeometry::MultiLine(lines) => lines.iter().map(|l| l.0.len()).sum(),
        }
    }

    pub fn simplified(&self, tolerance: f64) -> RouteGeometry {
        match self {
            RouteGeometry::Line(line) => RouteGeometry::Line(line.simplify(&tolerance)),
            RouteGeometry::MultiLine(lines) => RouteGeometry::MultiLine(lines.simplify(&tolerance)),
        }
    }

    pub fn as_multi(&self) -> MultiLineString<f64> {
        match self {
            RouteGeometry::Line(line) => MultiLineString::new(vec![line.clone()]),
            RouteGeometry::MultiLine(lines) => lines.clone(),
        }
    }

    /// Intersection with a mercator rectangle.
    pub fn clipped(&self, rect: &Rect<f64>) -> MultiLineString<f64> {
        rect.to_polygon().clip(&self.as_multi(), false)
    }

    /// Start and end coordinate of every member line.
    pub fn endpoints(&self) -> Vec<Coord<f64>> {
        let mut points = Vec::new();
        for line in self.as_multi() {
            if let (Some(first), Some(last)) = (line.0.first(), line.0.last()) {
                points.push(*first);
                points.push(*last);
            }
        }
        points
    }

    /// Member lines as WGS84 (lon, lat) pairs, for GPX export.
    pub fn wgs84_lines(&self) -> Vec<Vec<(f64, f64)>> {
        self.as_multi()
            .iter()
            .map(|line| line.coords().map(|c| mercator_to_wgs84(*c)).collect())
            .collect()
    }

    /// Spheroid length of all member lines in km.
    pub fn geodesic_length_km(&self) -> f64 {
        self.as_multi()
            .iter()
            .map(|line| {
                let wgs84 = line_to_wgs84(line);
                wgs84
                    .points()
                    .zip(wgs84.points().skip(1))
                    .map(|(a, b)| Geodesic::distance(a, b))
                    .sum::<f64>()
            })
            .sum::<f64>()
            / 1000.0
    }

    /// Smallest great-circle distance in meters from a WGS84 point to any
    /// member line endpoint. None for empty geometry.
    pub fn min_endpoint_distance(&self, lon: f64, lat: f64) -> Option<f64> {
        let user = Point::new(lon, lat);
        self.endpoints()
            .into_iter()
            .map(|coord| {
                let (elon, elat) = mercator_to_wgs84(coord);
                Haversine::distance(user, Point::new(elon, elat))
            })
            .fold(None, |best: Option<f64>, d| {
                Some(best.map_or(d, |b| b.min(d)))
            })
    }
}

fn line_to_wgs84(line: &LineString<f64>) -> LineString<f64> {
    line.coords()
        .map(|c| {
            let (lon, lat) = mercator_to_wgs84(*c);
            Coord { x: lon, y: lat }
        })
        .collect()
}

/// Multi-line in mercator coordinates converted to a WGS84 GeoJSON geometry.
pub fn multiline_to_wgs84_geojson(lines: &MultiLineString<f64>) -> geojson::Geometry {
    let converted: Vec<LineString<f64>> = lines.iter().map(line_to_wgs84).collect();
    geojson::Geometry::new(Value::from(&MultiLineString::new(converted)))
}
