use std::env;

/// Runtime configuration, read from the environment (.env supported).
#[derive(Debug, Clone)]
pub struct Config {
    /// Default language of the site, weighted above any browser preference.
    pub site_lang: String,
    /// Cap for bbox-filtered route lists.
    pub max_routes_in_list: usize,
    /// Contact address advertised in the Wikipedia API user agent.
    pub contact: String,
}

impl Config {
    pub fn from_env() -> Self {
        let site_lang = env::var("ROUTEMAP_SITE_LANG").unwrap_or_else(|_| "en".to_string());
        let max_routes_in_list = env::var("ROUTEMAP_MAX_ROUTES_IN_LIST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let contact =
            env::var("ROUTEMAP_CONTACT").unwrap_or_else(|_| "webmaster@localhost".to_string());

        Self {
            site_lang,
            max_routes_in_list,
            contact,
        }
    }
}

/// Languages that commonly carry usable route names for speakers of the
/// given one, with a closeness weight in [0, 1].
pub fn language_aliases(lang: &str) -> &'static [(&'static str, f64)] {
    match lang {
        "no" => &[("nb", 1.0), ("nn", 0.5)],
        "nb" => &[("no", 1.0), ("nn", 0.5)],
        "nn" => &[("no", 1.0), ("nb", 0.5)],
        "sr" => &[("sh", 1.0), ("hr", 0.5), ("bs", 0.5)],
        "sh" => &[("sr", 1.0), ("hr", 0.5), ("bs", 0.5)],
        "cs" => &[("sk", 0.5)],
        "sk" => &[("cs", 0.5)],
        _ => &[],
    }
}
