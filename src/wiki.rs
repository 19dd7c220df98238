use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Creates the shared HTTP client used for Wikipedia lookups.
pub fn create_client(contact: &str) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(format!("routemap/0.1 (report problems to {})", contact))
        .build()
}

/// Collect Wikipedia references from route tags, keyed by language.
///
/// Both tag forms are understood: `wikipedia = "lang:title"` and
/// `wikipedia:lang = title`. A bare title without a language prefix counts
/// as English. Values may already be full URLs.
pub fn wikipedia_tags(tags: &HashMap<String, String>) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for (key, value) in tags {
        if key == "wikipedia" {
            match value.split_once(':') {
                Some((lang, title)) if is_language_code(lang) && !title.is_empty() => {
                    entries.insert(lang.to_string(), title.to_string());
                }
                _ => {
                    entries.insert("en".to_string(), value.clone());
                }
            }
        } else if let Some(lang) = key.strip_prefix("wikipedia:") {
            if is_language_code(lang) {
                entries.insert(lang.to_string(), value.clone());
            }
        }
    }
    entries
}

// Language codes end up in the API hostname, so be strict about them.
fn is_language_code(lang: &str) -> bool {
    !lang.is_empty()
        && lang.len() <= 12
        && lang
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Resolve the best Wikipedia link for the user's language ranking.
///
/// A direct entry for a preferred language wins. Otherwise each non-URL
/// entry is asked for a cross-language link via the public Wikipedia API;
/// a failed lookup gives up on that language. When nothing matches, any
/// entry serves as fallback.
pub async fn resolve_wikilink(
    client: &reqwest::Client,
    entries: &BTreeMap<String, String>,
    ranked: &[String],
) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut found: Option<(String, String)> = None;
    'langs: for lang in ranked {
        if let Some(value) = entries.get(lang) {
            found = Some((lang.clone(), value.clone()));
            break;
        }

        for (source_lang, title) in entries {
            if title.starts_with("http") {
                continue;
            }
            match fetch_langlink(client, source_lang, title, lang).await {
                Ok(Some(url)) => {
                    found = Some((lang.clone(), url));
                    break 'langs;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("wikipedia langlink lookup for {source_lang}:{title} failed: {err}");
                    continue 'langs;
                }
            }
        }
    }

    let (lang, value) = found.or_else(|| {
        entries
            .iter()
            .next_back()
            .map(|(lang, value)| (lang.clone(), value.clone()))
    })?;
    Some(finalize_link(&lang, &value))
}

/// Turn a resolved entry into a safe redirect target.
fn finalize_link(lang: &str, value: &str) -> String {
    let link = if value.starts_with("http") {
        value.to_string()
    } else {
        format!(
            "https://{}.wikipedia.org/wiki/{}",
            lang,
            urlencoding::encode(value)
        )
    };
    // quotes would escape an attribute in anything embedding the location
    link.replace('"', "%22").replace('\'', "%27")
}

#[derive(Debug, Deserialize)]
struct LangLinksResponse {
    query: Option<QuerySection>,
}

#[derive(Debug, Deserialize)]
struct QuerySection {
    #[serde(default)]
    pages: HashMap<String, PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    langlinks: Option<Vec<LangLink>>,
}

#[derive(Debug, Deserialize)]
struct LangLink {
    url: Option<String>,
}

/// Ask the Wikipedia of `source_lang` for the article URL in `target_lang`.
async fn fetch_langlink(
    client: &reqwest::Client,
    source_lang: &str,
    title: &str,
    target_lang: &str,
) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
    let resp = client
        .get(format!("https://{}.wikipedia.org/w/api.php", source_lang))
        .query(&[
            ("action", "query"),
            ("prop", "langlinks"),
            ("titles", title),
            ("llurl", "true"),
            ("lllang", target_lang),
            ("format", "json"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(format!("langlinks request failed: status={}", resp.status()).into());
    }

    let data: LangLinksResponse = resp.json().await?;
    Ok(data
        .query
        .and_then(|q| q.pages.into_values().next())
        .and_then(|page| page.langlinks)
        .and_then(|links| links.into_iter().next())
        .and_then(|link| link.url))
}
