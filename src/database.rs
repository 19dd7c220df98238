use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Result, Row};
use std::collections::HashMap;
use std::path::Path;

use crate::geometry::{Bbox, GeometryError, RouteGeometry};

/// A route relation with its tags, translated names and display geometry.
#[derive(Debug)]
pub struct RouteRecord {
    pub id: i64,
    pub name: String,
    pub intnames: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub level: i64,
    pub top: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub geom: RouteGeometry,
}

/// Open the database and create tables if they don't exist.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS routes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            intnames TEXT NOT NULL DEFAULT '{}',
            tags TEXT NOT NULL DEFAULT '{}',
            level INTEGER NOT NULL DEFAULT 30,
            top INTEGER NOT NULL DEFAULT 1,
            last_update TEXT,
            geom TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS hierarchy (
            parent INTEGER NOT NULL,
            child INTEGER NOT NULL,
            depth INTEGER NOT NULL,
            PRIMARY KEY (parent, child)
        );
        CREATE INDEX IF NOT EXISTS idx_hierarchy_child ON hierarchy (child);
        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            min_lon REAL NOT NULL,
            min_lat REAL NOT NULL,
            max_lon REAL NOT NULL,
            max_lat REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_segments_bbox ON segments (min_lon, max_lon);
        CREATE TABLE IF NOT EXISTS segment_rels (
            segment_id INTEGER NOT NULL,
            rel_id INTEGER NOT NULL,
            PRIMARY KEY (segment_id, rel_id)
        );",
    )
}

const ROUTE_COLUMNS: &str = "id, name, intnames, tags, level, top, last_update, geom";

fn route_from_row(row: &Row) -> Result<RouteRecord> {
    let intnames_json: String = row.get(2)?;
    let tags_json: String = row.get(3)?;
    let last_update: Option<String> = row.get(6)?;
    let geom_json: String = row.get(7)?;

    Ok(RouteRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        intnames: parse_json_column(2, &intnames_json)?,
        tags: parse_json_column(3, &tags_json)?,
        level: row.get(4)?,
        top: row.get(5)?,
        last_update: last_update
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        geom: RouteGeometry::from_geojson(&geom_json).map_err(|e| geom_column_error(7, e))?,
    })
}

fn parse_json_column(idx: usize, raw: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn geom_column_error(idx: usize, err: GeometryError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Fetch a single route by relation id.
pub fn get_route(conn: &Connection, id: i64) -> Result<Option<RouteRecord>> {
    let sql = format!("SELECT {ROUTE_COLUMNS} FROM routes WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], route_from_row)?;
    rows.next().transpose()
}

/// Fetch several routes at once; unknown ids are silently skipped.
pub fn get_routes_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<RouteRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT {ROUTE_COLUMNS} FROM routes WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), route_from_row)?;
    rows.collect()
}

/// Top-level routes with a member segment inside the given map area,
/// ordered by network level.
pub fn top_routes_in_bbox(
    conn: &Connection,
    bbox: &Bbox,
    limit: usize,
) -> Result<Vec<RouteRecord>> {
    let sql = format!(
        "SELECT {ROUTE_COLUMNS} FROM routes
          WHERE top = 1
            AND id IN (SELECT DISTINCT h.parent
                         FROM hierarchy h
                         JOIN segment_rels sr ON sr.rel_id = h.child
                         JOIN segments s ON s.id = sr.segment_id
                        WHERE s.max_lon >= ?1 AND s.min_lon <= ?2
                          AND s.max_lat >= ?3 AND s.min_lat <= ?4)
          ORDER BY level, id
          LIMIT ?5"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![bbox.min_lon, bbox.max_lon, bbox.min_lat, bbox.max_lat, limit as i64],
        route_from_row,
    )?;
    rows.collect()
}

/// Routes this one is a direct member of.
pub fn superroutes(conn: &Connection, id: i64) -> Result<Vec<RouteRecord>> {
    relation_query(
        conn,
        "SELECT r.id, r.name, r.intnames, r.tags, r.level, r.top, r.last_update, r.geom
           FROM routes r
           JOIN hierarchy h ON h.parent = r.id
          WHERE h.child = ?1 AND h.depth = 2
          ORDER BY r.level, r.id",
        id,
    )
}

/// Direct member routes of this one.
pub fn subroutes(conn: &Connection, id: i64) -> Result<Vec<RouteRecord>> {
    relation_query(
        conn,
        "SELECT r.id, r.name, r.intnames, r.tags, r.level, r.top, r.last_update, r.geom
           FROM routes r
           JOIN hierarchy h ON h.child = r.id
          WHERE h.parent = ?1 AND h.depth = 2
          ORDER BY r.level, r.id",
        id,
    )
}

fn relation_query(conn: &Connection, sql: &str, id: i64) -> Result<Vec<RouteRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], route_from_row)?;
    rows.collect()
}

pub fn route_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM routes", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Route data for batch insert.
pub struct NewRoute {
    pub id: i64,
    pub name: String,
    pub intnames: String,
    pub tags: String,
    pub level: i64,
    pub top: bool,
    pub last_update: Option<String>,
    pub geom: String,
}

/// Insert routes in a transaction, replacing existing records.
pub fn insert_routes_batch(conn: &mut Connection, routes: &[NewRoute]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO routes (id, name, intnames, tags, level, top, last_update, geom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for route in routes {
            stmt.execute(params![
                route.id,
                route.name,
                route.intnames,
                route.tags,
                route.level,
                route.top,
                route.last_update,
                route.geom,
            ])?;
        }
    }
    tx.commit()
}

/// A member-line bounding box belonging to one relation, WGS84 degrees.
pub struct NewSegment {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub rel_id: i64,
}

pub fn insert_segments_batch(conn: &mut Connection, segments: &[NewSegment]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut insert_segment = tx.prepare(
            "INSERT INTO segments (min_lon, min_lat, max_lon, max_lat) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut insert_rel = tx
            .prepare("INSERT OR IGNORE INTO segment_rels (segment_id, rel_id) VALUES (?1, ?2)")?;
        for segment in segments {
            insert_segment.execute(params![
                segment.min_lon,
                segment.min_lat,
                segment.max_lon,
                segment.max_lat,
            ])?;
            insert_rel.execute(params![tx.last_insert_rowid(), segment.rel_id])?;
        }
    }
    tx.commit()
}

/// Insert hierarchy closure rows (parent, child, depth).
pub fn insert_hierarchy_batch(conn: &mut Connection, rows: &[(i64, i64, i64)]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO hierarchy (parent, child, depth) VALUES (?1, ?2, ?3)",
        )?;
        for (parent, child, depth) in rows {
            stmt.execute(params![parent, child, depth])?;
        }
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::wgs84_to_mercator;
    use geo::LineString;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn sample_route(id: i64, name: &str, level: i64, top: bool) -> NewRoute {
        let line = LineString::new(vec![
            wgs84_to_mercator(8.0, 47.0),
            wgs84_to_mercator(8.1, 47.1),
        ]);
        NewRoute {
            id,
            name: name.to_string(),
            intnames: r#"{"de":"Weg","en":"Way"}"#.to_string(),
            tags: r#"{"operator":"club"}"#.to_string(),
            level,
            top,
            last_update: Some("2024-05-01T12:00:00+00:00".to_string()),
            geom: RouteGeometry::Line(line).to_geojson_string(),
        }
    }

    #[test]
    fn route_roundtrip() {
        let mut conn = memory_db();
        insert_routes_batch(&mut conn, &[sample_route(7, "Testweg", 10, true)]).unwrap();

        let route = get_route(&conn, 7).unwrap().unwrap();
        assert_eq!(route.name, "Testweg");
        assert_eq!(route.intnames["en"], "Way");
        assert_eq!(route.tags["operator"], "club");
        assert_eq!(route.level, 10);
        assert!(route.top);
        assert!(route.last_update.is_some());
        assert_eq!(route.geom.num_points(), 2);

        assert!(get_route(&conn, 99).unwrap().is_none());
        assert_eq!(route_count(&conn).unwrap(), 1);
    }

    #[test]
    fn lookup_by_id_list() {
        let mut conn = memory_db();
        insert_routes_batch(
            &mut conn,
            &[
                sample_route(1, "a", 10, true),
                sample_route(2, "b", 20, true),
            ],
        )
        .unwrap();

        let routes = get_routes_by_ids(&conn, &[2, 1, 5]).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(get_routes_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn bbox_list_walks_hierarchy() {
        let mut conn = memory_db();
        // 1 is the top route, 2 its member; only the member has a segment
        // inside the viewport.
        insert_routes_batch(
            &mut conn,
            &[
                sample_route(1, "top", 10, true),
                sample_route(2, "member", 20, false),
                sample_route(3, "elsewhere", 10, true),
            ],
        )
        .unwrap();
        insert_hierarchy_batch(&mut conn, &[(1, 1, 1), (2, 2, 1), (3, 3, 1), (1, 2, 2)]).unwrap();
        insert_segments_batch(
            &mut conn,
            &[
                NewSegment {
                    min_lon: 8.0,
                    min_lat: 47.0,
                    max_lon: 8.1,
                    max_lat: 47.1,
                    rel_id: 2,
                },
                NewSegment {
                    min_lon: 30.0,
                    min_lat: 60.0,
                    max_lon: 30.5,
                    max_lat: 60.5,
                    rel_id: 3,
                },
            ],
        )
        .unwrap();

        let bbox = Bbox::parse("7.9,46.9,8.2,47.2").unwrap();
        let routes = top_routes_in_bbox(&conn, &bbox, 10).unwrap();
        // the member is not top, its parent is; route 3 is out of view
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, 1);

        let all = Bbox::parse("-180,-89,180,89").unwrap();
        let routes = top_routes_in_bbox(&conn, &all, 10).unwrap();
        assert_eq!(routes.len(), 2);
        // capped by limit
        let routes = top_routes_in_bbox(&conn, &all, 1).unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn direct_relations_only() {
        let mut conn = memory_db();
        insert_routes_batch(
            &mut conn,
            &[
                sample_route(1, "grandparent", 0, true),
                sample_route(2, "parent", 10, false),
                sample_route(3, "child", 20, false),
            ],
        )
        .unwrap();
        insert_hierarchy_batch(
            &mut conn,
            &[(1, 1, 1), (2, 2, 1), (3, 3, 1), (1, 2, 2), (2, 3, 2), (1, 3, 3)],
        )
        .unwrap();

        let supers = superroutes(&conn, 3).unwrap();
        assert_eq!(supers.len(), 1);
        assert_eq!(supers[0].id, 2);

        let subs = subroutes(&conn, 1).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, 2);
    }
}
