//! Generic list/detail extraction from HTML (CSS selectors) and JSON (dot paths).

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use super::config::{render_template, HtmlDetailRules, HtmlListRules, JsonListRules};
use super::{ScrapeError, ScrapeResult};
use crate::models::{EntityKind, EntityRecord};

fn selector(s: &str) -> ScrapeResult<Selector> {
    Selector::parse(s).map_err(|e| ScrapeError::Config(format!("invalid selector '{}': {:?}", s, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve a possibly-relative link against the page it came from.
pub fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    Url::parse(base_url)
        .and_then(|base| base.join(path))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_url.trim_end_matches('/'), path))
}

/// Last non-empty path segment, used as an entity id.
fn id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .rfind(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
}

/// Extract a value from nested JSON using dot-notation path.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => match key.parse::<usize>() {
                Ok(idx) => arr.get(idx).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => &Value::Null,
        };
    }
    current
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct HtmlListParser {
    kind: EntityKind,
    row: Selector,
    name: Selector,
    link: Selector,
    fields: Vec<(String, Selector)>,
}

impl HtmlListParser {
    pub fn new(kind: EntityKind, rules: &HtmlListRules) -> ScrapeResult<Self> {
        let fields = rules
            .fields
            .iter()
            .map(|(name, s)| Ok((name.clone(), selector(s)?)))
            .collect::<ScrapeResult<Vec<_>>>()?;
        Ok(Self {
            kind,
            row: selector(&rules.row)?,
            name: selector(&rules.name)?,
            link: selector(&rules.link)?,
            fields,
        })
    }

    /// Rows without a usable link are skipped.
    pub fn parse(&self, html: &str, page_url: &str) -> Vec<EntityRecord> {
        let document = Html::parse_document(html);
        let mut records = Vec::new();

        for row in document.select(&self.row) {
            let Some(href) = row
                .select(&self.link)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };
            let url = resolve_url(page_url, href);
            let Some(id) = id_from_url(&url) else {
                continue;
            };

            let mut record = EntityRecord::new(self.kind, id, url);
            record.name = row
                .select(&self.name)
                .next()
                .map(element_text)
                .filter(|s| !s.is_empty());
            for (field, sel) in &self.fields {
                if let Some(el) = row.select(sel).next() {
                    record
                        .data
                        .insert(field.clone(), Value::String(element_text(el)));
                }
            }
            records.push(record);
        }
        records
    }
}

pub struct HtmlDetailParser {
    fields: Vec<(String, Selector)>,
}

impl HtmlDetailParser {
    pub fn new(rules: &HtmlDetailRules) -> ScrapeResult<Self> {
        let fields = rules
            .fields
            .iter()
            .map(|(name, s)| Ok((name.clone(), selector(s)?)))
            .collect::<ScrapeResult<Vec<_>>>()?;
        Ok(Self { fields })
    }

    /// Object of every field whose selector matched.
    pub fn parse(&self, html: &str) -> ScrapeResult<Value> {
        let document = Html::parse_document(html);
        let mut out = Map::new();
        for (field, sel) in &self.fields {
            if let Some(el) = document.select(sel).next() {
                out.insert(field.clone(), Value::String(element_text(el)));
            }
        }
        if out.is_empty() && !self.fields.is_empty() {
            return Err(ScrapeError::Parse("no detail fields matched".to_string()));
        }
        Ok(Value::Object(out))
    }
}

pub struct JsonListParser {
    kind: EntityKind,
    rules: JsonListRules,
}

impl JsonListParser {
    pub fn new(kind: EntityKind, rules: JsonListRules) -> Self {
        Self { kind, rules }
    }

    pub fn parse(&self, body: &Value) -> ScrapeResult<Vec<EntityRecord>> {
        let items = extract_path(body, &self.rules.items_path)
            .as_array()
            .ok_or_else(|| {
                ScrapeError::Parse(format!("no array at '{}'", self.rules.items_path))
            })?;

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let fields = extract_path(item, &self.rules.item_path);
            let Some(id) = scalar_string(extract_path(fields, &self.rules.id_field)) else {
                continue;
            };
            let url = render_template(&self.rules.url_template, &[("id", &id)]);
            let mut record = EntityRecord::new(self.kind, id, url);
            record.name = scalar_string(extract_path(fields, &self.rules.name_field));
            if let Value::Object(map) = fields {
                record.data.extend(map.clone());
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::ScraperConfig;
    use serde_json::json;

    const PLAYER_PAGE: &str = r#"
        <table class="players"><tbody>
          <tr><td class="rank">1</td><td class="name"><a href="/players/faker">Faker</a></td><td class="team">T1</td></tr>
          <tr><td class="rank">2</td><td class="name"><a href="https://stats.example.gg/players/chovy">Chovy</a></td><td class="team">GEN</td></tr>
          <tr><td class="rank">3</td><td class="name">No link</td></tr>
        </tbody></table>
    "#;

    #[test]
    fn test_html_list_parser() {
        let config = ScraperConfig::default();
        let parser = HtmlListParser::new(EntityKind::Player, &config.player_list).unwrap();
        let records = parser.parse(PLAYER_PAGE, "https://stats.example.gg/players?page=1");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "faker");
        assert_eq!(records[0].url, "https://stats.example.gg/players/faker");
        assert_eq!(records[0].name.as_deref(), Some("Faker"));
        assert_eq!(records[0].data["team"], json!("T1"));
        assert_eq!(records[1].id, "chovy");
    }

    #[test]
    fn test_html_detail_parser() {
        let config = ScraperConfig::default();
        let parser = HtmlDetailParser::new(&config.player_detail).unwrap();
        let value = parser
            .parse(r#"<div class="profile"><span class="country"> South  Korea </span></div>"#)
            .unwrap();
        assert_eq!(value, json!({"country": "South Korea"}));

        assert!(parser.parse("<html></html>").is_err());
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let rules = HtmlDetailRules {
            fields: [("x".to_string(), "[[".to_string())].into_iter().collect(),
        };
        assert!(matches!(
            HtmlDetailParser::new(&rules),
            Err(ScrapeError::Config(_))
        ));
    }

    #[test]
    fn test_json_list_parser() {
        let config = ScraperConfig::default();
        let parser = JsonListParser::new(EntityKind::Team, config.team_list);
        let body = json!({
            "cargoquery": [
                {"title": {"Name": "T1", "Region": "Korea"}},
                {"title": {"Name": "Cloud9", "Region": "North America"}},
                {"title": {"Region": "Nameless"}}
            ]
        });
        let records = parser.parse(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "Cloud9");
        assert!(records[1].url.contains("Cloud9"));
        assert_eq!(records[1].data["Region"], json!("North America"));

        assert!(parser.parse(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_extract_path() {
        let data = json!({"a": [{"b": 1}]});
        assert_eq!(extract_path(&data, "a.0.b"), &json!(1));
        assert_eq!(extract_path(&data, "a.1.b"), &Value::Null);
        assert_eq!(extract_path(&data, ""), &data);
    }
}
