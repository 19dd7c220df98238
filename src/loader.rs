use geo::LineString;
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::database::{self, NewRoute, NewSegment};
use crate::geometry::{wgs84_to_mercator, RouteGeometry};

/// A route extract as produced by the database export tooling: routes with
/// their WGS84 member lines plus direct parent/child relations.
#[derive(Debug, Deserialize)]
pub struct RouteExtract {
    #[serde(default)]
    pub routes: Vec<ExtractRoute>,
    #[serde(default)]
    pub hierarchy: Vec<ExtractLink>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRoute {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub intnames: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default = "default_top")]
    pub top: bool,
    #[serde(default)]
    pub last_update: Option<String>,
    /// Member lines as [lon, lat] coordinate lists.
    pub lines: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractLink {
    pub parent: i64,
    pub child: i64,
}

fn default_level() -> i64 {
    30
}

fn default_top() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read extract: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse extract: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub routes: usize,
    pub segments: usize,
    pub hierarchy: usize,
}

pub fn import_file(conn: &mut Connection, path: &Path) -> Result<ImportStats, ImportError> {
    let raw = fs::read_to_string(path)?;
    let extract: RouteExtract = serde_json::from_str(&raw)?;
    import_extract(conn, &extract)
}

pub fn import_extract(
    conn: &mut Connection,
    extract: &RouteExtract,
) -> Result<ImportStats, ImportError> {
    let mut routes = Vec::new();
    let mut segments = Vec::new();

    for route in &extract.routes {
        let lines: Vec<LineString<f64>> = route
            .lines
            .iter()
            .filter(|points| points.len() >= 2)
            .map(|points| {
                points
                    .iter()
                    .map(|[lon, lat]| wgs84_to_mercator(*lon, *lat))
                    .collect()
            })
            .collect();

        let Some(geom) = RouteGeometry::from_lines(lines) else {
            warn!("skipping route {} without usable geometry", route.id);
            continue;
        };

        for points in &route.lines {
            if let Some(segment) = segment_bbox(route.id, points) {
                segments.push(segment);
            }
        }

        routes.push(NewRoute {
            id: route.id,
            name: route.name.clone(),
            intnames: serde_json::to_string(&route.intnames)?,
            tags: serde_json::to_string(&route.tags)?,
            level: route.level,
            top: route.top,
            last_update: route.last_update.clone(),
            geom: geom.to_geojson_string(),
        });
    }

    let route_ids: HashSet<i64> = routes.iter().map(|r| r.id).collect();
    let closure = hierarchy_closure(&extract.hierarchy, &route_ids);

    database::insert_routes_batch(conn, &routes)?;
    database::insert_segments_batch(conn, &segments)?;
    database::insert_hierarchy_batch(conn, &closure)?;

    Ok(ImportStats {
        routes: routes.len(),
        segments: segments.len(),
        hierarchy: closure.len(),
    })
}

fn segment_bbox(rel_id: i64, points: &[[f64; 2]]) -> Option<NewSegment> {
    if points.len() < 2 {
        return None;
    }
    let mut segment = NewSegment {
        min_lon: f64::INFINITY,
        min_lat: f64::INFINITY,
        max_lon: f64::NEG_INFINITY,
        max_lat: f64::NEG_INFINITY,
        rel_id,
    };
    for [lon, lat] in points {
        segment.min_lon = segment.min_lon.min(*lon);
        segment.min_lat = segment.min_lat.min(*lat);
        segment.max_lon = segment.max_lon.max(*lon);
        segment.max_lat = segment.max_lat.max(*lat);
    }
    Some(segment)
}

/// Expand direct parent/child links into the transitive closure stored in
/// the hierarchy table: every route references itself at depth 1, direct
/// members sit at depth 2, members of members at depth 3 and so on.
fn hierarchy_closure(links: &[ExtractLink], route_ids: &HashSet<i64>) -> Vec<(i64, i64, i64)> {
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for link in links {
        if route_ids.contains(&link.parent) && route_ids.contains(&link.child) {
            children.entry(link.parent).or_default().push(link.child);
        }
    }

    let mut closure = Vec::new();
    for &root in route_ids {
        closure.push((root, root, 1));

        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([(root, 1i64)]);
        while let Some((node, depth)) = queue.pop_front() {
            for &child in children.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(child) {
                    closure.push((root, child, depth + 1));
                    queue.push_back((child, depth + 1));
                }
            }
        }
    }

    closure.sort_unstable();
    closure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::geometry::Bbox;

    fn sample_extract() -> RouteExtract {
        serde_json::from_str(
            r#"{
                "routes": [
                    {
                        "id": 1,
                        "name": "Main Trail",
                        "intnames": {"de": "Hauptweg"},
                        "tags": {"distance": "120 km"},
                        "level": 10,
                        "lines": [[[8.0, 47.0], [8.1, 47.05], [8.2, 47.1]]]
                    },
                    {
                        "id": 2,
                        "name": "Stage 1",
                        "level": 20,
                        "top": false,
                        "lines": [
                            [[8.0, 47.0], [8.05, 47.02]],
                            [[8.05, 47.02], [8.1, 47.05]]
                        ]
                    },
                    {
                        "id": 3,
                        "name": "Broken",
                        "lines": [[[8.0, 47.0]]]
                    }
                ],
                "hierarchy": [{"parent": 1, "child": 2}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn import_into_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        database::init_schema(&conn).unwrap();

        let stats = import_extract(&mut conn, &sample_extract()).unwrap();
        // route 3 has no usable line and is dropped
        assert_eq!(stats.routes, 2);
        assert_eq!(stats.segments, 3);
        // two self rows plus one membership row
        assert_eq!(stats.hierarchy, 3);

        let route = database::get_route(&conn, 1).unwrap().unwrap();
        assert_eq!(route.name, "Main Trail");
        assert_eq!(route.intnames["de"], "Hauptweg");
        assert_eq!(route.geom.num_points(), 3);
        assert!(route.top);

        let stage = database::get_route(&conn, 2).unwrap().unwrap();
        assert!(!stage.top);
        assert_eq!(stage.geom.num_points(), 4);

        // the member segments make the parent discoverable by bbox
        let bbox = Bbox::parse("7.9,46.9,8.3,47.2").unwrap();
        let listed = database::top_routes_in_bbox(&conn, &bbox, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 1);

        let subs = database::subroutes(&conn, 1).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, 2);
    }

    #[test]
    fn closure_depths() {
        let ids: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let links = vec![
            ExtractLink { parent: 1, child: 2 },
            ExtractLink { parent: 2, child: 3 },
        ];
        let closure = hierarchy_closure(&links, &ids);
        assert!(closure.contains(&(1, 1, 1)));
        assert!(closure.contains(&(1, 2, 2)));
        assert!(closure.contains(&(1, 3, 3)));
        assert!(closure.contains(&(2, 3, 2)));
        assert_eq!(closure.len(), 6);
    }

    #[test]
    fn closure_survives_cycles() {
        let ids: HashSet<i64> = [1, 2].into_iter().collect();
        let links = vec![
            ExtractLink { parent: 1, child: 2 },
            ExtractLink { parent: 2, child: 1 },
        ];
        let closure = hierarchy_closure(&links, &ids);
        // each node reaches the other exactly once
        assert!(closure.contains(&(1, 2, 2)));
        assert!(closure.contains(&(2, 1, 2)));
        assert_eq!(closure.len(), 4);
    }
}
