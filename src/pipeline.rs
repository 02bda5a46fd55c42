use anyhow::{Context, Result, anyhow};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use url::Url;

use crate::{
    category::Category,
    clean::{self, NewListing},
    config::Config,
    extract::{self, CardSelectors},
    fetch::{self, PageSource, Pagination},
    store::Store,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    pub category: Category,
    /// Page count; falls back to the configured default.
    pub pages: Option<usize>,
    /// Follow next-page links instead of counting pages.
    #[serde(default)]
    pub follow_next: bool,
    /// Explicit start URL (must be whitelisted); defaults to the category page.
    pub start_url: Option<String>,
}

impl ScrapeRequest {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            pages: None,
            follow_next: false,
            start_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: usize,
    pub url: String,
    pub cards: usize,
    pub inserted: usize,
    pub rows: Vec<NewListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapeReport {
    pub category: String,
    pub pages_fetched: usize,
    pub cards_seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub next_url: Option<String>,
}

/// Scrape-clean-store runner for a single page source.
pub struct Pipeline<S> {
    source: S,
    store: Store,
    selectors: CardSelectors,
    base_url: Url,
    allowed_hosts: Vec<String>,
    default_pages: usize,
    page_delay: Duration,
    respect_robots: bool,
}

impl<S: PageSource> Pipeline<S> {
    pub fn new(source: S, store: Store, config: &Config) -> Result<Self> {
        Ok(Self {
            source,
            store,
            selectors: CardSelectors::coinafrique()?,
            base_url: config.base_url.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            default_pages: config.default_pages,
            page_delay: config.page_delay,
            respect_robots: config.respect_robots,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(&self, req: &ScrapeRequest) -> Result<ScrapeReport> {
        self.run_with_progress(req, None).await
    }

    /// Walks the pages of one category, persisting each page as it lands.
    pub async fn run_with_progress(
        &self,
        req: &ScrapeRequest,
        progress: Option<&mpsc::Sender<PageReport>>,
    ) -> Result<ScrapeReport> {
        let start = match &req.start_url {
            Some(u) => Url::parse(u).context("invalid start url")?,
            None => req.category.listing_url(&self.base_url)?,
        };
        fetch::ensure_allowed_host(&start, &self.allowed_hosts)?;

        if self.respect_robots && !self.source.robots_allowed(&start).await? {
            return Err(anyhow!("robots.txt disallows {start}"));
        }

        let pagination = if req.follow_next {
            Pagination::FollowNext {
                max_pages: req.pages.unwrap_or(fetch::HARD_PAGE_CAP),
            }
        } else {
            Pagination::Fixed(req.pages.unwrap_or(self.default_pages))
        };
        let max_pages = pagination.max_pages();

        let (base, mut page) = fetch::normalize_pager(&start);
        let origin = format!("{}://{}/", start.scheme(), start.host_str().unwrap_or_default());
        let mut page_url = fetch::build_page_url(&base, page);
        let mut referer = origin;
        let mut seen: HashSet<String> = HashSet::new();
        let mut report = ScrapeReport {
            category: req.category.slug().to_string(),
            ..Default::default()
        };

        tracing::info!(
            category = %req.category,
            label = req.category.label(),
            %start,
            ?pagination,
            "scrape started"
        );

        while report.pages_fetched < max_pages {
            if report.pages_fetched > 0 && !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }

            let html = match self.source.fetch_page(&page_url, &referer).await {
                Ok(h) => h,
                Err(e) if report.pages_fetched == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(url = %page_url, error = %format!("{e:#}"), "page fetch failed, stopping walk");
                    report.next_url = Some(page_url.to_string());
                    break;
                }
            };
            report.pages_fetched += 1;

            // Html is !Send; keep it out of scope across awaits.
            let (rows, next_link) = {
                let doc = Html::parse_document(&html);
                let cards = extract::extract_cards(&doc, &page_url, &self.selectors);
                let next = match pagination {
                    Pagination::FollowNext { .. } => {
                        extract::find_next_page(&doc, &page_url, page, &self.selectors)
                    }
                    Pagination::Fixed(_) => None,
                };
                let rows: Vec<NewListing> = cards
                    .into_iter()
                    .map(|c| clean::clean_card(c, req.category))
                    .collect();
                (rows, next)
            };

            let cards = rows.len();
            report.cards_seen += cards;
            let fresh = clean::dedup_into(rows, &mut seen);
            let inserted = self.store.insert_rows(&fresh).await?;
            report.inserted += inserted;
            report.duplicates += cards - inserted;

            tracing::info!(page, url = %page_url, cards, inserted, total = report.inserted, "page stored");

            if let Some(tx) = progress {
                let _ = tx
                    .send(PageReport {
                        page,
                        url: page_url.to_string(),
                        cards,
                        inserted,
                        rows: fresh,
                    })
                    .await;
            }

            if cards == 0 {
                tracing::info!(page, "empty page, stopping");
                report.next_url = None;
                break;
            }

            let next = match pagination {
                Pagination::Fixed(_) => Some(fetch::build_page_url(&base, page + 1)),
                Pagination::FollowNext { .. } => next_link,
            };
            let Some(next) = next else {
                tracing::info!(page, "no next page link, stopping");
                report.next_url = None;
                break;
            };
            if let Err(e) = fetch::ensure_allowed_host(&next, &self.allowed_hosts) {
                tracing::warn!(page, url = %next, error = %e, "next page leaves the whitelist, stopping");
                report.next_url = None;
                break;
            }
            report.next_url = Some(next.to_string());
            referer = page_url.to_string();
            page_url = next;
            page += 1;
        }

        tracing::info!(
            category = %req.category,
            pages = report.pages_fetched,
            cards = report.cards_seen,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "scrape finished"
        );
        Ok(report)
    }
}
