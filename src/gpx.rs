use chrono::{DateTime, Utc};

/// Build GPX 1.1 XML for a route, one track segment per member line.
/// Coordinates are WGS84 (lon, lat) pairs.
pub fn build_gpx(
    name: &str,
    last_update: Option<DateTime<Utc>>,
    lines: &[Vec<(f64, f64)>],
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<gpx version=\"1.1\" creator=\"routemap\" xmlns=\"http://www.topografix.com/GPX/1/1\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:schemaLocation=\"http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd\">\n");

    xml.push_str("  <metadata>\n");
    xml.push_str(&format!("    <name>{}</name>\n", xml_escape(name)));
    if let Some(time) = last_update {
        xml.push_str(&format!("    <time>{}</time>\n", time.to_rfc3339()));
    }
    xml.push_str("  </metadata>\n");

    xml.push_str(&format!(
        "  <trk>\n    <name>{}</name>\n",
        xml_escape(name)
    ));

    for line in lines {
        xml.push_str("    <trkseg>\n");
        for (lon, lat) in line {
            xml.push_str(&format!(
                "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\"/>\n",
                lat, lon
            ));
        }
        xml.push_str("    </trkseg>\n");
    }

    xml.push_str("  </trk>\n</gpx>\n");
    xml
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Reduce a route name to a safe download filename stem.
pub fn slugify(name: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "route".to_string()
    } else {
        out
    }
}
