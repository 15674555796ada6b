//! `SourceScraper` over HTTP, driven entirely by `ScraperConfig`.

use async_trait::async_trait;
use serde_json::Value;

use super::config::{render_template, ScraperConfig};
use super::http_client::HttpClient;
use super::parser::{extract_path, HtmlDetailParser, HtmlListParser, JsonListParser};
use super::{ScrapeError, ScrapeResult, SourceScraper};
use crate::models::{DetailScope, EntityKind, EntityRecord, EntityRef, ListTarget, OpClass, Source};

pub struct HttpScraper {
    client: HttpClient,
    config: ScraperConfig,
    player_list: HtmlListParser,
    player_detail: HtmlDetailParser,
    player_earnings: HtmlDetailParser,
    team_list: JsonListParser,
    event_list: JsonListParser,
}

impl HttpScraper {
    /// Fails on invalid selectors so bad config is caught at startup.
    pub fn new(client: HttpClient, config: ScraperConfig) -> ScrapeResult<Self> {
        Ok(Self {
            player_list: HtmlListParser::new(EntityKind::Player, &config.player_list)?,
            player_detail: HtmlDetailParser::new(&config.player_detail)?,
            player_earnings: HtmlDetailParser::new(&config.player_earnings)?,
            team_list: JsonListParser::new(EntityKind::Team, config.team_list.clone()),
            event_list: JsonListParser::new(EntityKind::Tournament, config.event_list.clone()),
            client,
            config,
        })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    fn list_url(&self, target: &ListTarget) -> String {
        match target {
            ListTarget::PlayerPage(page) => render_template(
                &self.config.player_list_url,
                &[("page", &page.to_string())],
            ),
            ListTarget::TeamRegion(region) => {
                render_template(&self.config.team_region_url, &[("region", region)])
            }
            ListTarget::EventList => self.config.event_list_url.clone(),
        }
    }

    fn detail_url(&self, entity: &EntityRef, scope: DetailScope) -> String {
        match scope {
            DetailScope::Profile => entity.url.clone(),
            DetailScope::Earnings => render_template(
                &self.config.earnings_url,
                &[("url", &entity.url), ("id", &entity.id)],
            ),
        }
    }
}

#[async_trait]
impl SourceScraper for HttpScraper {
    async fn scrape_list(&self, target: &ListTarget) -> ScrapeResult<Vec<EntityRecord>> {
        let url = self.list_url(target);
        let source = target.source();
        let op = target.op_class();

        match target {
            ListTarget::PlayerPage(_) => {
                let html = self.client.get_text(source, op, &url).await?;
                Ok(self.player_list.parse(&html, &url))
            }
            ListTarget::TeamRegion(_) => {
                let body = self.client.get_json(source, op, &url).await?;
                self.team_list.parse(&body)
            }
            ListTarget::EventList => {
                let body = self.client.get_json(source, op, &url).await?;
                self.event_list.parse(&body)
            }
        }
    }

    async fn scrape_detail(&self, entity: &EntityRef, scope: DetailScope) -> ScrapeResult<Value> {
        let url = self.detail_url(entity, scope);
        match entity.kind.home_source() {
            Source::Stats => {
                let html = self.client.get_text(Source::Stats, OpClass::Query, &url).await?;
                match scope {
                    DetailScope::Profile => self.player_detail.parse(&html),
                    DetailScope::Earnings => self.player_earnings.parse(&html),
                }
            }
            Source::Wiki => {
                let body = self.client.get_json(Source::Wiki, OpClass::Parse, &url).await?;
                let detail = extract_path(&body, &self.config.wiki_detail_path);
                if detail.is_null() {
                    return Err(ScrapeError::Parse(format!(
                        "no detail at '{}' for {}",
                        self.config.wiki_detail_path, entity.id
                    )));
                }
                Ok(detail.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{BackoffController, RateLimiter};
    use crate::scrapers::ActiveRequests;
    use std::time::Duration;

    fn scraper() -> HttpScraper {
        let client = HttpClient::new(
            Duration::from_secs(5),
            None,
            RateLimiter::with_defaults(),
            BackoffController::default(),
            ActiveRequests::new(),
        )
        .unwrap();
        HttpScraper::new(client, ScraperConfig::default()).unwrap()
    }

    #[test]
    fn test_list_urls() {
        let scraper = scraper();
        assert_eq!(
            scraper.list_url(&ListTarget::PlayerPage(3)),
            "https://stats.example.gg/players?page=3"
        );
        assert!(scraper
            .list_url(&ListTarget::TeamRegion("North America".into()))
            .contains("North%20America"));
    }

    #[test]
    fn test_detail_urls() {
        let scraper = scraper();
        let entity = EntityRef::new(EntityKind::Player, "faker", "https://stats.example.gg/players/faker");
        assert_eq!(scraper.detail_url(&entity, DetailScope::Profile), entity.url);
        assert_eq!(
            scraper.detail_url(&entity, DetailScope::Earnings),
            "https://stats.example.gg/players/faker/earnings"
        );
    }
}
