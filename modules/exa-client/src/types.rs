use serde::{Deserialize, Serialize};

/// Search block of a webset creation request.
#[derive(Debug, Clone, Serialize)]
pub struct WebsetSearch {
    pub query: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<WebsetEntity>,
}

/// Entity hint for a search ({"type": "company"}, {"type": "movie"}, ...).
#[derive(Debug, Clone, Serialize)]
pub struct WebsetEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// One enrichment request attached to a webset.
#[derive(Debug, Clone, Serialize)]
pub struct WebsetEnrichment {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Body of POST /websets.
#[derive(Debug, Clone, Serialize)]
pub struct CreateWebsetRequest {
    pub search: WebsetSearch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichments: Option<Vec<WebsetEnrichment>>,
}

/// Webset metadata returned by create and status calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Webset {
    pub id: String,
    /// Provider status code ("running", "idle", "paused", ...).
    pub status: String,
    #[serde(rename = "searches", default)]
    pub searches: Vec<serde_json::Value>,
}

impl Webset {
    pub fn is_idle(&self) -> bool {
        self.status == "idle"
    }
}

/// One cursor page of webset items. Items are opaque property bags; the
/// only field this client relies on is the stable `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemPage {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// Extract the stable upstream id from an opaque item, when present.
pub fn item_id(item: &serde_json::Value) -> Option<&str> {
    item.get("id").and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_page_parses_cursor_fields() {
        let json = r#"{"data":[{"id":"a"},{"id":"b"}],"hasMore":true,"nextCursor":"abc"}"#;
        let page: ItemPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.data.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        assert_eq!(item_id(&page.data[0]), Some("a"));
    }

    #[test]
    fn item_page_tolerates_missing_fields() {
        let page: ItemPage = serde_json::from_str("{}").unwrap();
        assert!(page.data.is_empty());
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn create_request_omits_absent_entity() {
        let req = CreateWebsetRequest {
            search: WebsetSearch {
                query: "ai startups".into(),
                count: 50,
                entity: None,
            },
            enrichments: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v["search"].get("entity").is_none());
        assert!(v.get("enrichments").is_none());
    }
}
