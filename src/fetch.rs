use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, DNT, HeaderMap, HeaderValue, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Upper bound on pages walked when following next-page links.
pub const HARD_PAGE_CAP: usize = 200;

/// Where listing pages come from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &Url, referer: &str) -> Result<String>;

    async fn robots_allowed(&self, _url: &Url) -> Result<bool> {
        Ok(true)
    }
}

// -------------------------
// HTTP fetcher
// -------------------------

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_page(&self, url: &Url, referer: &str) -> Result<String> {
        let rsp = self
            .client
            .get(url.as_str())
            .headers(base_headers(referer)?)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = rsp.status();
        let final_url = rsp.url().clone();
        let rsp = rsp
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        let text = rsp.text().await.context("failed to read response body")?;

        tracing::debug!(%url, %status, %final_url, len = text.len(), referer, "fetched page");
        Ok(text)
    }

    async fn robots_allowed(&self, url: &Url) -> Result<bool> {
        let host = url.host_str().ok_or_else(|| anyhow!("url has no host"))?;
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        let robots_txt = match self.client.get(&robots_url).send().await {
            Ok(rsp) if rsp.status().is_success() => rsp.text().await.unwrap_or_default(),
            Ok(rsp) => {
                tracing::debug!(%robots_url, status = %rsp.status(), "no robots.txt");
                String::new()
            }
            Err(e) => {
                tracing::warn!(%robots_url, error = %e, "robots.txt unreachable");
                String::new()
            }
        };
        Ok(robots_allows(&robots_txt, url))
    }
}

pub fn robots_allows(robots_txt: &str, url: &Url) -> bool {
    let mut matcher = DefaultMatcher::default();
    matcher.one_agent_allowed_by_robots(robots_txt, "Mozilla", url.as_str())
}

fn base_headers(referer: &str) -> Result<HeaderMap> {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static(random_desktop_ua()));
    h.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    h.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    h.insert(
        REFERER,
        HeaderValue::from_str(referer).context("referer is not a valid header value")?,
    );
    h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    h.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    h.insert(DNT, HeaderValue::from_static("1"));
    Ok(h)
}

fn random_desktop_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    ];
    UAS[rng().random_range(0..UAS.len())]
}

// -------------------------
// Targets & paging
// -------------------------

pub fn ensure_allowed_host(url: &Url, allowed: &[String]) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("url has no host"))?
        .to_ascii_lowercase();
    if !allowed.iter().any(|h| *h == host) {
        return Err(anyhow!("domain not in whitelist: {host}"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Walk `n` consecutive pages from the start page.
    Fixed(usize),
    /// Follow next-page links until there are none.
    FollowNext { max_pages: usize },
}

impl Pagination {
    pub fn max_pages(self) -> usize {
        match self {
            Pagination::Fixed(n) => n,
            Pagination::FollowNext { max_pages } => max_pages.min(HARD_PAGE_CAP),
        }
    }
}

/// Splits `url` into its `page`-free base and the page it points at (>= 1).
pub fn normalize_pager(url: &Url) -> (Url, usize) {
    let mut base = url.clone();
    let mut start_page: usize = 1;
    let mut qp: Vec<(String, String)> = vec![];
    for (k, v) in url.query_pairs() {
        if k == "page" {
            if let Ok(n) = v.parse::<usize>() {
                start_page = n.max(1);
            }
        } else {
            qp.push((k.into_owned(), v.into_owned()));
        }
    }
    if qp.is_empty() {
        base.set_query(None);
    } else {
        base.query_pairs_mut()
            .clear()
            .extend_pairs(qp.iter().map(|(k, v)| (&**k, &**v)));
    }
    (base, start_page)
}

pub fn build_page_url(base: &Url, page: usize) -> Url {
    let mut u = base.clone();
    u.query_pairs_mut().append_pair("page", &page.to_string());
    u
}
