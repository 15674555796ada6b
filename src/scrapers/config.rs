//! Source endpoints and extraction rules.
//!
//! Source-specific DOM and API shapes are configuration, not code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// CSS rules for a list page: one row per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlListRules {
    pub row: String,
    /// Element whose text is the entity name.
    pub name: String,
    /// Anchor linking to the entity's detail page; its last path segment
    /// becomes the entity id.
    pub link: String,
    /// Extra attribute name -> selector (text content).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// CSS rules for a detail page: attribute name -> selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HtmlDetailRules {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Dot-path rules for a JSON list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonListRules {
    /// Path to the array of items.
    pub items_path: String,
    /// Path inside each item to the record object (empty for the item itself).
    #[serde(default)]
    pub item_path: String,
    pub id_field: String,
    pub name_field: String,
    /// Detail page URL, `{id}` substituted (URL-encoded).
    pub url_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// None: default agent; "impersonate": browser agent; other: verbatim.
    pub user_agent: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// `{page}` substituted.
    pub player_list_url: String,
    /// `{region}` substituted.
    pub team_region_url: String,
    pub event_list_url: String,
    /// `{url}` (entity URL) and `{id}` substituted.
    pub earnings_url: String,
    pub player_list: HtmlListRules,
    pub player_detail: HtmlDetailRules,
    pub player_earnings: HtmlDetailRules,
    pub team_list: JsonListRules,
    pub event_list: JsonListRules,
    /// Path into wiki detail responses holding the record.
    pub wiki_detail_path: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        let mut player_fields = BTreeMap::new();
        player_fields.insert("rank".to_string(), "td.rank".to_string());
        player_fields.insert("team".to_string(), "td.team".to_string());

        let mut detail_fields = BTreeMap::new();
        detail_fields.insert("real_name".to_string(), ".profile .real-name".to_string());
        detail_fields.insert("country".to_string(), ".profile .country".to_string());
        detail_fields.insert("role".to_string(), ".profile .role".to_string());

        let mut earnings_fields = BTreeMap::new();
        earnings_fields.insert("total".to_string(), ".earnings .total".to_string());

        Self {
            user_agent: None,
            request_timeout_secs: 30,
            player_list_url: "https://stats.example.gg/players?page={page}".to_string(),
            team_region_url: "https://wiki.example.gg/api.php?action=cargoquery&format=json&tables=Teams&fields=Name,Region&where=Region%3D%22{region}%22".to_string(),
            event_list_url: "https://wiki.example.gg/api.php?action=cargoquery&format=json&tables=Tournaments&fields=Name,DateStart&order_by=DateStart%20DESC".to_string(),
            earnings_url: "{url}/earnings".to_string(),
            player_list: HtmlListRules {
                row: "table.players tbody tr".to_string(),
                name: "td.name".to_string(),
                link: "td.name a".to_string(),
                fields: player_fields,
            },
            player_detail: HtmlDetailRules {
                fields: detail_fields,
            },
            player_earnings: HtmlDetailRules {
                fields: earnings_fields,
            },
            team_list: JsonListRules {
                items_path: "cargoquery".to_string(),
                item_path: "title".to_string(),
                id_field: "Name".to_string(),
                name_field: "Name".to_string(),
                url_template: "https://wiki.example.gg/api.php?action=cargoquery&format=json&tables=Teams&where=Name%3D%22{id}%22".to_string(),
            },
            event_list: JsonListRules {
                items_path: "cargoquery".to_string(),
                item_path: "title".to_string(),
                id_field: "Name".to_string(),
                name_field: "Name".to_string(),
                url_template: "https://wiki.example.gg/api.php?action=cargoquery&format=json&tables=Tournaments&where=Name%3D%22{id}%22".to_string(),
            },
            wiki_detail_path: "cargoquery.0.title".to_string(),
        }
    }
}

/// Substitute `{key}` placeholders. Values are URL-encoded except `url`.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        let value = if *key == "url" {
            value.to_string()
        } else {
            urlencoding::encode(value).into_owned()
        };
        out = out.replace(&placeholder, &value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template_encodes_values() {
        assert_eq!(
            render_template("https://w/{region}", &[("region", "North America")]),
            "https://w/North%20America"
        );
        assert_eq!(
            render_template("{url}/earnings", &[("url", "https://s/p/faker"), ("id", "faker")]),
            "https://s/p/faker/earnings"
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ScraperConfig = toml::from_str("request_timeout_secs = 5").unwrap();
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.player_list, ScraperConfig::default().player_list);
    }
}
