//! Canonicalization: turn a raw upstream item into the distilled view all
//! matching rules operate on.
//!
//! Everything here is deterministic and total: missing or malformed input
//! yields empty derived fields, never an error. Canonicalization must be
//! stable, so running it on its own output changes nothing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use websift_common::DedupMode;

// --- Domain tables ---

/// Multi-part public suffixes we recognize. Hosts under anything else use
/// the last two labels as the registrable domain.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "co.jp", "ne.jp", "or.jp", "com.au", "net.au",
    "org.au", "com.br", "com.cn", "com.mx", "com.tr", "co.in", "co.kr", "co.za", "com.sg",
    "com.hk", "com.tw", "co.nz", "com.ar",
];

/// Subdomains that carry no organizational meaning.
const GENERIC_SUBDOMAINS: &[&str] = &[
    "www", "app", "web", "m", "mobile", "en", "shop", "store", "online", "portal", "home",
];

/// Subdomains that signal a corporate section of the same organization.
const ORG_SUBDOMAINS: &[&str] = &[
    "corp", "corporate", "about", "careers", "jobs", "ir", "investor", "investors", "team",
    "company",
];

/// Registrable domains of known video platforms. Items hosted here are
/// fingerprinted by title, not by domain, so distinct videos on the same
/// platform never collapse.
const VIDEO_PLATFORMS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "tiktok.com",
    "rumble.com",
];

/// How a subdomain reads. `Generic` and `Organizational` subdomains of the
/// same registrable domain are treated as the same site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdomainKind {
    Generic,
    Organizational,
    Specific,
}

// --- Canonical row ---

/// Distilled view of a raw item used by all matching rules.
#[derive(Debug, Clone)]
pub struct CanonicalRow {
    pub row_id: String,
    pub name: String,
    pub url: String,
    pub host: String,
    pub etld1: String,
    pub brand: String,
    pub sub_kind: SubdomainKind,
    pub is_video_platform: bool,
    /// Entity-mode comparison key. Video-platform titles keep trailing
    /// qualifiers so numbering variants stay distinguishable.
    pub normalized_title: String,
    pub raw: Value,
}

impl CanonicalRow {
    /// Tier-0 fingerprint key: `brand:etld1:subCls`, or `video:<slug>` for
    /// video platforms.
    pub fn tier0_key(&self) -> String {
        if self.is_video_platform {
            format!("video:{}", name_slug(&self.name))
        } else {
            format!("{}:{}:{}", self.brand, self.etld1, self.sub_cls())
        }
    }

    /// The stored subdomain class: `generic` or `other`.
    pub fn sub_cls(&self) -> &'static str {
        match self.sub_kind {
            SubdomainKind::Generic => "generic",
            _ => "other",
        }
    }
}

/// Build the canonical row for a raw item. When the raw item has no `id`,
/// a fresh one is minted and written back into the retained copy so stream
/// frames referencing the row id stay consistent.
pub fn canonicalize(raw: &Value, mode: DedupMode) -> CanonicalRow {
    let url = extract_url(raw);
    let host = host_of(&url);
    let etld1 = registrable_domain(&host);
    let brand = brand_of(&etld1);
    let sub_kind = subdomain_kind(&host, &etld1);
    let is_video = VIDEO_PLATFORMS.contains(&etld1.as_str());

    let mut name = clean_name(&extract_name(raw, mode));
    if name.is_empty() && !etld1.is_empty() {
        name = domain_fallback_name(&etld1);
    }

    let normalized_title = if is_video {
        video_normalized_title(&name)
    } else {
        normalized_title(&name)
    };

    let mut raw = raw.clone();
    let existing_id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(String::from);
    let row_id = match existing_id {
        Some(id) => id,
        None => {
            let minted = Uuid::new_v4().to_string();
            if let Value::Object(map) = &mut raw {
                map.insert("id".to_string(), Value::String(minted.clone()));
            }
            minted
        }
    };

    CanonicalRow {
        row_id,
        name,
        url,
        host,
        etld1,
        brand,
        sub_kind,
        is_video_platform: is_video,
        normalized_title,
        raw,
    }
}

// --- URL extraction ---

/// First non-empty of properties.url, top-level url, any nested url/website
/// under properties, then source if it looks like a URL.
fn extract_url(raw: &Value) -> String {
    if let Some(u) = raw.pointer("/properties/url").and_then(|v| v.as_str()) {
        if !u.is_empty() {
            return u.to_string();
        }
    }
    if let Some(u) = raw.get("url").and_then(|v| v.as_str()) {
        if !u.is_empty() {
            return u.to_string();
        }
    }
    if let Some(Value::Object(props)) = raw.get("properties") {
        for nested in props.values() {
            if let Value::Object(obj) = nested {
                for key in ["url", "website"] {
                    if let Some(u) = obj.get(key).and_then(|v| v.as_str()) {
                        if !u.is_empty() {
                            return u.to_string();
                        }
                    }
                }
            }
        }
    }
    if let Some(s) = raw.get("source").and_then(|v| v.as_str()) {
        if s.starts_with("http://") || s.starts_with("https://") {
            return s.to_string();
        }
    }
    String::new()
}

// --- Name extraction ---

fn extract_name(raw: &Value, mode: DedupMode) -> String {
    let priority: &[&str] = match mode {
        DedupMode::Entity => &["title", "name"],
        DedupMode::Company => &["name", "title"],
    };

    for key in priority {
        if let Some(n) = raw.get(*key).and_then(|v| v.as_str()) {
            if !n.is_empty() {
                return n.to_string();
            }
        }
    }
    for key in priority {
        if let Some(n) = raw
            .pointer(&format!("/properties/{key}"))
            .and_then(|v| v.as_str())
        {
            if !n.is_empty() {
                return n.to_string();
            }
        }
    }
    if mode == DedupMode::Company {
        if let Some(n) = raw
            .pointer("/properties/company/name")
            .and_then(|v| v.as_str())
        {
            if !n.is_empty() {
                return n.to_string();
            }
        }
    }
    // Last resort: scan nested objects under properties.
    let nested_keys: &[&str] = match mode {
        DedupMode::Entity => &["title", "name"],
        DedupMode::Company => &["name", "title", "company_name"],
    };
    if let Some(Value::Object(props)) = raw.get("properties") {
        for nested in props.values() {
            if let Value::Object(obj) = nested {
                for key in nested_keys {
                    if let Some(n) = obj.get(*key).and_then(|v| v.as_str()) {
                        if !n.is_empty() {
                            return n.to_string();
                        }
                    }
                }
            }
        }
    }
    String::new()
}

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_NAME_KEEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 \-&.,()]").unwrap());
static RE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip HTML tags and entities, keep alphanumerics plus `-&.,()`, collapse
/// whitespace.
pub fn clean_name(name: &str) -> String {
    let s = RE_TAG.replace_all(name, " ");
    let s = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let s = RE_NAME_KEEP.replace_all(&s, " ");
    RE_WS.replace_all(&s, " ").trim().to_string()
}

/// Fallback display name when an item carries no usable title: the first
/// label of its registrable domain.
fn domain_fallback_name(etld1: &str) -> String {
    etld1.split('.').next().unwrap_or_default().to_string()
}

// --- Host parsing ---

/// Hostname of a URL, lowercased, without port. Tolerates bare domains.
pub fn host_of(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    let candidate = if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    match url::Url::parse(&candidate) {
        Ok(parsed) => parsed.host_str().unwrap_or_default().to_lowercase(),
        Err(_) => String::new(),
    }
}

/// Registrable domain (eTLD+1) of a host.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return host.to_string();
    }
    let last_two = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
    if labels.len() >= 3 && MULTI_PART_SUFFIXES.contains(&last_two.as_str()) {
        format!("{}.{}", labels[labels.len() - 3], last_two)
    } else {
        last_two
    }
}

/// Brand token: the registrable domain without its suffix, lowercased, with
/// digits and separators stripped.
pub fn brand_of(etld1: &str) -> String {
    etld1
        .split('.')
        .next()
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Classify the subdomain part of a host relative to its registrable domain.
pub fn subdomain_kind(host: &str, etld1: &str) -> SubdomainKind {
    if host.is_empty() || etld1.is_empty() || host == etld1 {
        return SubdomainKind::Generic;
    }
    let Some(sub) = host.strip_suffix(etld1).map(|s| s.trim_end_matches('.')) else {
        return SubdomainKind::Generic;
    };
    // For multi-level subdomains the label closest to the domain decides.
    let leaf = sub.split('.').next_back().unwrap_or(sub);
    if sub.is_empty() || GENERIC_SUBDOMAINS.contains(&leaf) {
        SubdomainKind::Generic
    } else if ORG_SUBDOMAINS.contains(&leaf) {
        SubdomainKind::Organizational
    } else {
        SubdomainKind::Specific
    }
}

// --- Title normalization ---

static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\s*(19|20)\d{2}\s*\)").unwrap());
static RE_FORMAT_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*(tv series|tv show|movie|film|book|anime|series|show)\s*\)").unwrap()
});
static RE_TV_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(tv[^)]*\)").unwrap());
static RE_FORMAT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(tv series|tv show|movie|film|book|anime|series|show)\s*$").unwrap()
});
static RE_REGION_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*(us|uk|japanese|english|dub|sub|original)[^)]*\)").unwrap()
});
static RE_LANG_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(japanese|english|dub(bed)?|sub(bed)?)\b").unwrap());
static RE_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(s\d+\s*e\d+|season\s+\d+|ep(isode)?\.?\s+\d+)\b.*$").unwrap()
});
static RE_EDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(remastered|director'?s cut|extended|revised|special|limited|ultimate|complete|definitive)(\s+(edition|cut|version))?\b",
    )
    .unwrap()
});
static RE_TRAILER_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(official\s+)?(trailer|teaser|tv spot|clip|behind the scenes|making of)\b.*$")
        .unwrap()
});
static RE_TRAILER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(official\s+)?(trailer|teaser|tv spot|clip|behind the scenes|making of)\b")
        .unwrap()
});
static RE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Canonical lowercase form of an entity title. Idempotent.
pub fn normalized_title(name: &str) -> String {
    let mut s = name.to_lowercase();
    s = RE_YEAR.replace_all(&s, " ").into_owned();
    s = RE_FORMAT_PAREN.replace_all(&s, " ").into_owned();
    s = RE_TV_PAREN.replace_all(&s, " ").into_owned();
    s = RE_FORMAT_SUFFIX.replace_all(&s, " ").into_owned();
    s = RE_REGION_PAREN.replace_all(&s, " ").into_owned();
    s = RE_LANG_WORD.replace_all(&s, " ").into_owned();
    s = RE_EPISODE.replace_all(&s, " ").into_owned();
    s = RE_EDITION.replace_all(&s, " ").into_owned();
    s = RE_TRAILER_SUFFIX.replace_all(&s, " ").into_owned();
    reposition_article(&collapse(&s))
}

/// Video-platform variant: strips trailer/teaser markers but keeps trailing
/// qualifiers ("#2" → "2") so numbering variants stay distinct.
pub fn video_normalized_title(name: &str) -> String {
    let mut s = name.to_lowercase();
    s = RE_YEAR.replace_all(&s, " ").into_owned();
    s = RE_TRAILER_MARKER.replace_all(&s, " ").into_owned();
    reposition_article(&collapse(&s))
}

fn collapse(s: &str) -> String {
    RE_PUNCT.replace_all(s, " ").trim().to_string()
}

/// Drop a leading "the" and a trailing ", the" so both orderings compare
/// equal. Runs after punctuation collapse, so only the word form remains.
fn reposition_article(s: &str) -> String {
    let s = s.strip_suffix(" the").unwrap_or(s);
    let s = s.strip_prefix("the ").unwrap_or(s);
    s.trim().to_string()
}

/// Lowercase alphanumeric slug used in video-platform tier-0 keys.
pub fn name_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    let collapsed = RE_PUNCT.replace_all(&lowered, "-");
    collapsed.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_priority_prefers_properties_url() {
        let raw = json!({
            "url": "https://top.example.com",
            "properties": {"url": "https://props.example.com"}
        });
        assert_eq!(extract_url(&raw), "https://props.example.com");
    }

    #[test]
    fn url_falls_back_to_nested_website() {
        let raw = json!({
            "properties": {"company": {"website": "https://nested.example.com"}}
        });
        assert_eq!(extract_url(&raw), "https://nested.example.com");
    }

    #[test]
    fn url_source_only_when_urlish() {
        let raw = json!({"source": "import"});
        assert_eq!(extract_url(&raw), "");
        let raw = json!({"source": "https://src.example.com"});
        assert_eq!(extract_url(&raw), "https://src.example.com");
    }

    #[test]
    fn registrable_domain_handles_multi_part_suffixes() {
        assert_eq!(registrable_domain("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("global.jd.com"), "jd.com");
        assert_eq!(registrable_domain("jd.hk"), "jd.hk");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn brand_strips_digits_and_separators() {
        assert_eq!(brand_of("jd-7.com"), "jd");
        assert_eq!(brand_of("apple.com"), "apple");
        assert_eq!(brand_of(""), "");
    }

    #[test]
    fn subdomain_kinds() {
        assert_eq!(subdomain_kind("apple.com", "apple.com"), SubdomainKind::Generic);
        assert_eq!(subdomain_kind("www.apple.com", "apple.com"), SubdomainKind::Generic);
        assert_eq!(
            subdomain_kind("careers.apple.com", "apple.com"),
            SubdomainKind::Organizational
        );
        assert_eq!(
            subdomain_kind("global.jd.com", "jd.com"),
            SubdomainKind::Specific
        );
    }

    #[test]
    fn clean_name_strips_html() {
        assert_eq!(clean_name("<b>Apple&nbsp;Inc.</b>"), "Apple Inc.");
        assert_eq!(clean_name("AT&amp;T"), "AT&T");
        assert_eq!(clean_name("  spaced   out  "), "spaced out");
    }

    #[test]
    fn normalized_title_strips_year_and_markers() {
        assert_eq!(normalized_title("District 9 (2009)"), "district 9");
        assert_eq!(normalized_title("District 9"), "district 9");
        assert_eq!(normalized_title("Breaking Bad (TV Series)"), "breaking bad");
        assert_eq!(normalized_title("Dark (TV Series 2017-2020)"), "dark");
        assert_eq!(normalized_title("Akira (Japanese Dub)"), "akira");
    }

    #[test]
    fn normalized_title_cuts_episode_tails() {
        assert_eq!(normalized_title("Lost S01E04 Walkabout"), "lost");
        assert_eq!(normalized_title("Lost Season 2"), "lost");
        assert_eq!(normalized_title("One Piece Episode 1015"), "one piece");
    }

    #[test]
    fn normalized_title_editions_and_trailers() {
        assert_eq!(
            normalized_title("Blade Runner Director's Cut"),
            "blade runner"
        );
        assert_eq!(
            normalized_title("Inception Official Trailer #2"),
            "inception"
        );
        assert_eq!(normalized_title("Dune Behind the Scenes"), "dune");
    }

    #[test]
    fn normalized_title_repositions_the() {
        assert_eq!(normalized_title("The Matrix"), "matrix");
        assert_eq!(normalized_title("Matrix, The"), "matrix");
    }

    #[test]
    fn normalized_title_is_idempotent() {
        for t in [
            "District 9 (2009)",
            "The Matrix",
            "Lost S01E04 Walkabout",
            "Inception Official Trailer #2",
            "Akira (Japanese Dub)",
        ] {
            let once = normalized_title(t);
            assert_eq!(normalized_title(&once), once, "not idempotent for {t}");
        }
    }

    #[test]
    fn video_normalized_title_keeps_qualifiers() {
        assert_eq!(
            video_normalized_title("Inception Official Trailer"),
            "inception"
        );
        assert_eq!(
            video_normalized_title("Inception Official Trailer #2"),
            "inception 2"
        );
    }

    #[test]
    fn canonicalize_is_stable() {
        let raw = json!({"id": "a", "name": "Apple", "url": "https://apple.com"});
        let row = canonicalize(&raw, DedupMode::Company);
        let again = canonicalize(&row.raw, DedupMode::Company);
        assert_eq!(row.row_id, again.row_id);
        assert_eq!(row.name, again.name);
        assert_eq!(row.etld1, again.etld1);
        assert_eq!(row.tier0_key(), again.tier0_key());
    }

    #[test]
    fn canonicalize_mints_id_into_raw() {
        let raw = json!({"name": "Apple", "url": "https://apple.com"});
        let row = canonicalize(&raw, DedupMode::Company);
        assert!(!row.row_id.is_empty());
        assert_eq!(row.raw["id"].as_str().unwrap(), row.row_id);
    }

    #[test]
    fn canonicalize_tolerates_empty_item() {
        let row = canonicalize(&json!({}), DedupMode::Company);
        assert!(row.name.is_empty());
        assert!(row.url.is_empty());
        assert!(row.etld1.is_empty());
        assert!(row.brand.is_empty());
    }

    #[test]
    fn tier0_keys() {
        let raw = json!({"id": "a", "name": "Apple", "url": "https://www.apple.com"});
        let row = canonicalize(&raw, DedupMode::Company);
        assert_eq!(row.tier0_key(), "apple:apple.com:generic");

        let raw = json!({"id": "v", "name": "Inception Official Trailer", "url": "https://youtube.com/x"});
        let row = canonicalize(&raw, DedupMode::Entity);
        assert!(row.is_video_platform);
        assert_eq!(row.tier0_key(), "video:inception-official-trailer");
    }

    #[test]
    fn name_fallback_uses_domain() {
        let raw = json!({"id": "a", "url": "https://stripe.com"});
        let row = canonicalize(&raw, DedupMode::Company);
        assert_eq!(row.name, "stripe");
    }
}
