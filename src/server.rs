use axum::{
    extract::Path as AxumPath, extract::Query, extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use geo::Simplify;
use geojson::{Feature, FeatureCollection, GeoJson};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::database::{self, RouteRecord};
use crate::geometry::{self, Bbox};
use crate::gpx;
use crate::lang;
use crate::wiki;

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<Config>,
    http: reqwest::Client,
}

pub async fn serve(
    conn: Connection,
    config: Config,
    bind: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let total = database::route_count(&conn)?;
    info!("serving {} routes from the database", total);

    let http = wiki::create_client(&config.contact)?;
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
        http,
    };

    let app = Router::new()
        .route("/", get(serve_map_html))
        .route("/routes", get(route_list))
        .route("/routes/box", get(routes_in_box))
        .route("/routes/:id/info", get(route_info))
        .route("/routes/:id/gpx", get(route_gpx))
        .route("/routes/:id/json", get(route_geometry))
        .route("/routes/:id/dist", get(route_distance))
        .route("/routes/:id/wikilink", get(route_wikilink))
        .with_state(state);

    let listener = TcpListener::bind(bind).await?;
    info!("route map server running at http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn not_found(id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("no route with id {}", id),
        }),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
}

fn db_error(err: rusqlite::Error) -> Response {
    error!("database error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "database error".to_string(),
        }),
    )
        .into_response()
}

/// Weighted language preferences and their descending ranking for a request.
fn language_context(
    state: &AppState,
    headers: &HeaderMap,
) -> (HashMap<String, f64>, Vec<String>) {
    let accept = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    let prefs = lang::language_preferences(&state.config.site_lang, accept);
    let ranked = lang::ranked_languages(&prefs);
    (prefs, ranked)
}

async fn serve_map_html() -> impl IntoResponse {
    let path = PathBuf::from("static/index.html");
    match fs::read_to_string(&path) {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            content,
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "index.html not found".to_string(),
        ),
    }
}

#[derive(Serialize)]
struct RouteRef {
    id: i64,
    name: String,
}

fn route_refs(routes: Vec<RouteRecord>, ranked: &[String]) -> Vec<RouteRef> {
    routes
        .into_iter()
        .map(|r| RouteRef {
            id: r.id,
            name: lang::localize_name(&r.name, &r.intnames, ranked),
        })
        .collect()
}

#[derive(Serialize)]
struct RouteInfoResponse {
    id: i64,
    name: String,
    level: i64,
    mapped_length: String,
    official_length: Option<String>,
    operator: Option<String>,
    tags: HashMap<String, String>,
    superroutes: Vec<RouteRef>,
    subroutes: Vec<RouteRef>,
    last_update: Option<String>,
}

async fn route_info(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> Response {
    let (prefs, ranked) = language_context(&state, &headers);

    let result = {
        let conn = state.db.lock().unwrap();
        database::get_route(&conn, id).and_then(|found| match found {
            Some(route) => {
                let supers = database::superroutes(&conn, id)?;
                let subs = database::subroutes(&conn, id)?;
                Ok(Some((route, supers, subs)))
            }
            None => Ok(None),
        })
    };

    let (route, supers, subs) = match result {
        Ok(Some(parts)) => parts,
        Ok(None) => return not_found(id),
        Err(err) => return db_error(err),
    };

    let loctags = lang::localize_tags(&route.tags, &prefs);
    let official_length =
        lang::tag_as_length_km(&loctags, &["distance", "length"]).map(lang::display_length);

    Json(RouteInfoResponse {
        id: route.id,
        name: lang::localize_name(&route.name, &route.intnames, &ranked),
        level: route.level,
        mapped_length: lang::display_length(route.geom.geodesic_length_km()),
        official_length,
        operator: loctags.get("operator").cloned(),
        tags: loctags,
        superroutes: route_refs(supers, &ranked),
        subroutes: route_refs(subs, &ranked),
        last_update: route.last_update.map(|dt| dt.to_rfc3339()),
    })
    .into_response()
}

async fn route_gpx(State(state): State<AppState>, AxumPath(id): AxumPath<i64>) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::get_route(&conn, id)
    };

    let route = match result {
        Ok(Some(route)) => route,
        Ok(None) => return not_found(id),
        Err(err) => return db_error(err),
    };

    let body = gpx::build_gpx(&route.name, route.last_update, &route.geom.wgs84_lines());
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "application/gpx+xml".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}.gpx", gpx::slugify(&route.name)),
            ),
        ],
        body,
    )
        .into_response()
}

async fn route_geometry(State(state): State<AppState>, AxumPath(id): AxumPath<i64>) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::get_route(&conn, id)
    };

    let route = match result {
        Ok(Some(route)) => route,
        Ok(None) => return not_found(id),
        Err(err) => return db_error(err),
    };

    let mut geom = route.geom;
    if let Some(tolerance) = geometry::display_tolerance(geom.num_points()) {
        geom = geom.simplified(tolerance);
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/geo+json")],
        GeoJson::Geometry(geom.to_wgs84_geojson()).to_string(),
    )
        .into_response()
}

#[derive(Serialize)]
struct DistResponse {
    route_id: i64,
    /// Meters from the query point to the nearest route endpoint, rounded.
    /// Null when the point parameters are missing or unparseable.
    min_distance: Option<f64>,
}

async fn route_distance(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::get_route(&conn, id)
    };

    let route = match result {
        Ok(Some(route)) => route,
        Ok(None) => return not_found(id),
        Err(err) => return db_error(err),
    };

    let lat = params.get("lat").and_then(|v| v.parse::<f64>().ok());
    let lon = params.get("lon").and_then(|v| v.parse::<f64>().ok());
    let min_distance = match (lat, lon) {
        (Some(lat), Some(lon)) => route
            .geom
            .min_endpoint_distance(lon, lat)
            .map(|d| d.round()),
        _ => None,
    };

    Json(DistResponse {
        route_id: id,
        min_distance,
    })
    .into_response()
}

async fn route_wikilink(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> Response {
    let (_, ranked) = language_context(&state, &headers);

    let result = {
        let conn = state.db.lock().unwrap();
        database::get_route(&conn, id)
    };

    let route = match result {
        Ok(Some(route)) => route,
        Ok(None) => return not_found(id),
        Err(err) => return db_error(err),
    };

    let entries = wiki::wikipedia_tags(&route.tags);
    match wiki::resolve_wikilink(&state.http, &entries, &ranked).await {
        Some(link) => (StatusCode::FOUND, [(header::LOCATION, link)]).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("route {} has no wikipedia entry", id),
            }),
        )
            .into_response(),
    }
}

async fn routes_in_box(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let bbox = match Bbox::parse(params.get("bbox").map(String::as_str).unwrap_or("")) {
        Ok(bbox) => bbox,
        Err(err) => return bad_request(err.to_string()),
    };

    let mut ids: Vec<i64> = params
        .get("ids")
        .map(String::as_str)
        .unwrap_or("")
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    ids.truncate(state.config.max_routes_in_list);

    let routes = if ids.is_empty() {
        Vec::new()
    } else {
        let conn = state.db.lock().unwrap();
        match database::get_routes_by_ids(&conn, &ids) {
            Ok(routes) => routes,
            Err(err) => return db_error(err),
        }
    };

    let rect = bbox.to_mercator_rect();
    let tolerance = geometry::box_tolerance(&bbox);

    let features: Vec<Feature> = routes
        .iter()
        .filter_map(|route| {
            let mut clipped = route.geom.clipped(&rect);
            if clipped.0.is_empty() {
                return None;
            }
            if let Some(tolerance) = tolerance {
                clipped = clipped.simplify(&tolerance);
            }
            let mut properties = geojson::JsonObject::new();
            properties.insert("id".to_string(), route.id.into());
            Some(Feature {
                bbox: None,
                geometry: Some(geometry::multiline_to_wgs84_geojson(&clipped)),
                id: Some(geojson::feature::Id::Number(route.id.into())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/geo+json")],
        GeoJson::FeatureCollection(collection).to_string(),
    )
        .into_response()
}

#[derive(Serialize)]
struct ListSection {
    title: &'static str,
    short_title: &'static str,
    routes: Vec<RouteRef>,
}

#[derive(Serialize)]
struct RouteListResponse {
    sections: Vec<ListSection>,
    ids: Vec<i64>,
    has_more: bool,
    bbox: String,
}

/// Routes group into four fixed sections by network level.
fn section_index(level: i64) -> usize {
    ((level.max(0)) / 10).min(3) as usize
}

async fn route_list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let raw_bbox = params.get("bbox").map(String::as_str).unwrap_or("");
    let bbox = match Bbox::parse(raw_bbox) {
        Ok(bbox) => bbox,
        Err(err) => return bad_request(err.to_string()),
    };

    let (_, ranked) = language_context(&state, &headers);
    let limit = state.config.max_routes_in_list;

    let routes = {
        let conn = state.db.lock().unwrap();
        match database::top_routes_in_bbox(&conn, &bbox, limit) {
            Ok(routes) => routes,
            Err(err) => return db_error(err),
        }
    };

    let has_more = routes.len() == limit;
    let mut sections = vec![
        ListSection {
            title: "continental",
            short_title: "int",
            routes: Vec::new(),
        },
        ListSection {
            title: "national",
            short_title: "nat",
            routes: Vec::new(),
        },
        ListSection {
            title: "regional",
            short_title: "reg",
            routes: Vec::new(),
        },
        ListSection {
            title: "other",
            short_title: "other",
            routes: Vec::new(),
        },
    ];

    let mut ids = Vec::with_capacity(routes.len());
    for route in routes {
        ids.push(route.id);
        sections[section_index(route.level)].routes.push(RouteRef {
            id: route.id,
            name: lang::localize_name(&route.name, &route.intnames, &ranked),
        });
    }

    Json(RouteListResponse {
        sections,
        ids,
        has_more,
        bbox: raw_bbox.to_string(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_grouping() {
        assert_eq!(section_index(0), 0);
        assert_eq!(section_index(9), 0);
        assert_eq!(section_index(10), 1);
        assert_eq!(section_index(25), 2);
        assert_eq!(section_index(30), 3);
        assert_eq!(section_index(95), 3);
        assert_eq!(section_index(-5), 0);
    }
}
