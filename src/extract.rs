use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Fields pulled off one listing card, before any cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCard {
    pub title: String,
    pub raw_price: String,
    pub address: String,
    pub image_link: String,
    pub source_url: String,
}

/// Compiled selector set for a listing page.
#[derive(Debug, Clone)]
pub struct CardSelectors {
    card: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    location: Selector,
    image: Selector,
    pager: Selector,
}

impl CardSelectors {
    pub fn coinafrique() -> Result<Self> {
        Ok(Self {
            card: parse("div.card.ad__card")?,
            link: parse("a.card-image, a.ad__card-image")?,
            title: parse("p.ad__card-description a")?,
            price: parse("p.ad__card-price")?,
            location: parse("p.ad__card-location")?,
            image: parse("img.ad__card-img")?,
            pager: parse("ul.pagination a[href]")?,
        })
    }
}

fn parse(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("bad selector {css:?}: {e}"))
}

// -------------------------
// Cards
// -------------------------

pub fn extract_cards(doc: &Html, page_url: &Url, sel: &CardSelectors) -> Vec<RawCard> {
    let mut cards = Vec::new();
    for (idx, el) in doc.select(&sel.card).enumerate() {
        match parse_card(&el, page_url, sel) {
            Some(card) => cards.push(card),
            None => tracing::debug!(page = %page_url, idx, "skipping malformed card"),
        }
    }
    cards
}

fn parse_card(card: &ElementRef, page_url: &Url, sel: &CardSelectors) -> Option<RawCard> {
    let title_a = card.select(&sel.title).next();
    let img = card.select(&sel.image).next();

    let title = title_a
        .map(|a| text_of(&a))
        .filter(|t| !t.is_empty())
        .or_else(|| img.and_then(|i| i.value().attr("alt")).map(|s| s.trim().to_string()))
        .unwrap_or_default();

    let raw_price = card
        .select(&sel.price)
        .next()
        .map(|e| text_of(&e))
        .unwrap_or_default();

    let address = card
        .select(&sel.location)
        .next()
        .map(|p| location_text(&p))
        .unwrap_or_default();

    let image_link = img
        .and_then(|i| {
            i.value()
                .attr("src")
                .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
                .or_else(|| i.value().attr("data-src"))
        })
        .map(|s| resolve(page_url, s))
        .unwrap_or_default();

    let source_url = card
        .select(&sel.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .or_else(|| title_a.and_then(|a| a.value().attr("href")))
        .map(|h| resolve(page_url, h))
        .unwrap_or_default();

    if title.is_empty() && raw_price.is_empty() && source_url.is_empty() {
        return None;
    }

    Some(RawCard {
        title,
        raw_price,
        address,
        image_link,
        source_url,
    })
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// The location paragraph carries a material-icons ligature ("location_on")
/// next to the place name; only the bare text nodes are the address.
fn location_text(p: &ElementRef) -> String {
    let scope = p
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "span")
        .unwrap_or(*p);

    let own: String = scope
        .children()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect();
    let own = own.trim();
    if own.is_empty() {
        text_of(&scope)
    } else {
        own.to_string()
    }
}

fn resolve(page_url: &Url, href: &str) -> String {
    page_url
        .join(href.trim())
        .map(|u| u.to_string())
        .unwrap_or_default()
}

// -------------------------
// Pagination
// -------------------------

/// The pager link pointing at `current + 1`, if the page has one.
pub fn find_next_page(
    doc: &Html,
    page_url: &Url,
    current: usize,
    sel: &CardSelectors,
) -> Option<Url> {
    let wanted = (current + 1).to_string();
    doc.select(&sel.pager)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|h| page_url.join(h).ok())
        .find(|u| u.query_pairs().any(|(k, v)| k == "page" && v == wanted.as_str()))
}
