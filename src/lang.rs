use std::collections::HashMap;

use crate::config;

/// Build a map of preferred languages and their weights from the site
/// language and the request's Accept-Language header.
///
/// The site language always wins (weight 2.0), its aliases follow at
/// 1.0 + 0.5 * alias weight. Header entries carry their q value (1.0 when
/// absent) and pull in their own aliases slightly below themselves. English
/// is always present as a last resort.
pub fn language_preferences(
    site_lang: &str,
    accept_language: Option<&str>,
) -> HashMap<String, f64> {
    let mut prefs = HashMap::new();
    prefs.insert(site_lang.to_string(), 2.0);
    for (alias, weight) in config::language_aliases(site_lang) {
        prefs.insert((*alias).to_string(), 1.0 + 0.5 * weight);
    }

    if let Some(header) = accept_language {
        for entry in header.split(',') {
            let entry = entry.trim();
            let (tag, weight) = match entry.find(';') {
                // everything after ";q=" is the weight, unparseable means 0
                Some(idx) => {
                    let w = entry
                        .get(idx + 3..)
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .unwrap_or(0.0);
                    (&entry[..idx], w)
                }
                None => (entry, 1.0),
            };

            let bytes = tag.as_bytes();
            let valid = bytes.len() == 2 || (bytes.len() > 2 && bytes[2] == b'-');
            if weight <= 0.0 || !valid {
                continue;
            }
            let lang = &tag[..2];

            if prefs.get(lang).map_or(true, |cur| *cur < weight) {
                prefs.insert(lang.to_string(), weight);
                for (alias, alias_weight) in config::language_aliases(lang) {
                    prefs
                        .entry((*alias).to_string())
                        .or_insert(weight - 0.001 * (2.0 - alias_weight));
                }
            }
        }
    }

    prefs.entry("en".to_string()).or_insert(0.0);
    prefs
}

/// Language codes ordered by descending preference weight.
pub fn ranked_languages(prefs: &HashMap<String, f64>) -> Vec<String> {
    let mut langs: Vec<(&String, f64)> = prefs.iter().map(|(k, w)| (k, *w)).collect();
    langs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(b.0)));
    langs.into_iter().map(|(k, _)| k.clone()).collect()
}

/// Collapse `key:lang` tag variants into plain keys according to the
/// preference weights. The highest-weighted variant wins; a plain tag only
/// survives when no known-language variant exists for its key.
pub fn localize_tags(
    tags: &HashMap<String, String>,
    prefs: &HashMap<String, f64>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut weights: HashMap<String, f64> = HashMap::new();

    for (key, value) in tags {
        if let Some((base, lang)) = key.split_once(':') {
            if !base.is_empty() {
                if let Some(weight) = prefs.get(lang) {
                    if weights.get(base).map_or(true, |cur| cur < weight) {
                        out.insert(base.to_string(), value.clone());
                        weights.insert(base.to_string(), *weight);
                    }
                    continue;
                }
            }
        }
        // plain tag, or a language variant nobody asked for
        if !weights.contains_key(key) {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    out
}

/// Pick the route name in the most preferred available language.
pub fn localize_name(
    name: &str,
    intnames: &HashMap<String, String>,
    ranked: &[String],
) -> String {
    for lang in ranked {
        if let Some(localized) = intnames.get(lang) {
            return localized.clone();
        }
    }
    name.to_string()
}

/// Read the first of the given tags as a length in km. Values may carry a
/// km/m/mi unit (km assumed) and a comma decimal separator.
pub fn tag_as_length_km(tags: &HashMap<String, String>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| tags.get(*key).and_then(|v| parse_length_km(v)))
}

fn parse_length_km(value: &str) -> Option<f64> {
    let value = value.trim().replace(',', ".");
    for (suffix, factor) in [("km", 1.0), ("mi", 1.609344), ("m", 0.001)] {
        if let Some(number) = value.strip_suffix(suffix) {
            return number.trim().parse::<f64>().ok().map(|n| n * factor);
        }
    }
    value.parse::<f64>().ok()
}

/// Format a length in km for display: below 1 km rounded to 10 m, below
/// 10 km with one decimal, above as whole kilometers.
pub fn display_length(km: f64) -> String {
    if km < 1.0 {
        format!("{} m", ((km * 100.0).round() * 10.0) as i64)
    } else if km < 10.0 {
        format!("{:.1} km", km)
    } else {
        format!("{} km", km.round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn site_language_dominates() {
        let prefs = language_preferences("de", Some("fr,en;q=0.8"));
        assert_eq!(prefs["de"], 2.0);
        assert_eq!(prefs["fr"], 1.0);
        assert_eq!(prefs["en"], 0.8);
        assert_eq!(ranked_languages(&prefs), vec!["de", "fr", "en"]);
    }

    #[test]
    fn english_defaults_to_zero() {
        let prefs = language_preferences("de", None);
        assert_eq!(prefs["en"], 0.0);
    }

    #[test]
    fn header_weights_and_region_tags() {
        let prefs = language_preferences("en", Some("de-AT,de;q=0.9,nonsense,x;q=0.5"));
        // region subtag truncated, first occurrence keeps the higher weight
        assert_eq!(prefs["de"], 1.0);
        // "nonsense" has no two-letter prefix boundary, "x" is too short
        assert!(!prefs.contains_key("no"));
        assert_eq!(prefs.len(), 2);
    }

    #[test]
    fn unparseable_q_drops_entry() {
        let prefs = language_preferences("en", Some("de;q=broken,fr;q="));
        assert!(!prefs.contains_key("de"));
        assert!(!prefs.contains_key("fr"));
    }

    #[test]
    fn site_aliases_rank_between_site_and_header() {
        let prefs = language_preferences("no", None);
        assert_eq!(prefs["no"], 2.0);
        assert_eq!(prefs["nb"], 1.5);
        assert_eq!(prefs["nn"], 1.25);
    }

    #[test]
    fn header_aliases_sort_just_below_their_language() {
        let prefs = language_preferences("en", Some("sr;q=0.9"));
        assert_eq!(prefs["sr"], 0.9);
        assert!(prefs["sh"] < 0.9 && prefs["sh"] > 0.89);
        let ranked = ranked_languages(&prefs);
        assert_eq!(ranked[0], "en");
        assert_eq!(ranked[1], "sr");
        assert_eq!(ranked[2], "sh");
    }

    #[test]
    fn localized_variant_beats_plain_tag() {
        let prefs = language_preferences("de", Some("en;q=0.5"));
        let loc = localize_tags(
            &tags(&[
                ("name", "Fallback"),
                ("name:de", "Rennsteig"),
                ("name:en", "Rennsteig Trail"),
                ("operator", "Verein"),
                ("note:ru", "не переведено"),
            ]),
            &prefs,
        );
        assert_eq!(loc["name"], "Rennsteig");
        assert_eq!(loc["operator"], "Verein");
        // unknown language variants survive under their full key
        assert_eq!(loc["note:ru"], "не переведено");
    }

    #[test]
    fn plain_tag_is_fallback_only() {
        let prefs = language_preferences("en", None);
        let loc = localize_tags(&tags(&[("name:en", "Coast Path"), ("name", "raw")]), &prefs);
        assert_eq!(loc["name"], "Coast Path");
    }

    #[test]
    fn name_localization_falls_back() {
        let intnames = tags(&[("de", "Jakobsweg"), ("en", "Way of St James")]);
        let ranked = vec!["fr".to_string(), "en".to_string()];
        assert_eq!(localize_name("camino", &intnames, &ranked), "Way of St James");
        assert_eq!(localize_name("camino", &HashMap::new(), &ranked), "camino");
    }

    #[test]
    fn length_parsing_units() {
        let t = tags(&[("distance", "160 km")]);
        assert_eq!(tag_as_length_km(&t, &["distance", "length"]), Some(160.0));
        let t = tags(&[("length", "2000m")]);
        assert_eq!(tag_as_length_km(&t, &["distance", "length"]), Some(2.0));
        let t = tags(&[("distance", "24,5")]);
        assert_eq!(tag_as_length_km(&t, &["distance"]), Some(24.5));
        let t = tags(&[("distance", "100 mi")]);
        assert!((tag_as_length_km(&t, &["distance"]).unwrap() - 160.9344).abs() < 1e-9);
        let t = tags(&[("distance", "about 12")]);
        assert_eq!(tag_as_length_km(&t, &["distance"]), None);
    }

    #[test]
    fn length_display_buckets() {
        assert_eq!(display_length(0.554), "550 m");
        assert_eq!(display_length(0.996), "1000 m");
        assert_eq!(display_length(5.25), "5.2 km");
        assert_eq!(display_length(9.96), "10.0 km");
        assert_eq!(display_length(123.4), "123 km");
    }
}
