use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, str::FromStr, sync::LazyLock};

use crate::{category::Category, extract::RawCard};

// -------------------------
// Item kinds
// -------------------------

/// Coarse classification of a listing, derived from its free-text type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Clothes,
    Shoes,
    Other,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Clothes => "clothes",
            ItemKind::Shoes => "shoes",
            ItemKind::Other => "other",
        }
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clothes" => Ok(ItemKind::Clothes),
            "shoes" => Ok(ItemKind::Shoes),
            "other" => Ok(ItemKind::Other),
            other => Err(anyhow!("unknown item kind: {other:?}")),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Matched as word prefixes against accent-folded, lowercased text.
const SHOE_WORDS: &[&str] = &[
    "chaussure", "sneaker", "sandale", "sandal", "mocassin", "botte", "bottine",
    "tong", "escarpin", "derby", "richelieu", "claquette", "babouche", "espadrille", "mule",
    "soulier", "pointure", "shoe", "boots",
];

const CLOTHES_WORDS: &[&str] = &[
    "vetement", "chemise", "pantalon", "jean", "shirt", "polo", "robe", "veste", "costume",
    "manteau", "blouson", "pull", "sweat", "short", "jupe", "boubou", "survetement", "maillot",
    "ensemble", "tenue", "body", "pyjama", "culotte", "calecon", "chaussette", "jogging",
    "kaftan", "caftan", "gilet", "hoodie", "tunique",
];

// Whole words only; as prefixes these swallow "basketball".
const SHOE_EXACT: &[&str] = &["basket", "baskets"];

/// Shoe keywords win over clothes keywords; no match falls back to `fallback`.
pub fn classify_kind(type_text: &str, fallback: ItemKind) -> ItemKind {
    let folded = fold(type_text);
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let hit = |vocab: &[&str]| words.iter().any(|w| vocab.iter().any(|k| w.starts_with(k)));

    if hit(SHOE_WORDS) || words.iter().any(|w| SHOE_EXACT.contains(w)) {
        ItemKind::Shoes
    } else if hit(CLOTHES_WORDS) {
        ItemKind::Clothes
    } else {
        fallback
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

// -------------------------
// Text & price normalization
// -------------------------

static RE_PRICE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d\s.,]*").unwrap());
static RE_GROUPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9]\d{0,2}(?:[.,]\d{3})+$").unwrap());

pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "12 000 CFA" -> 12000.0, "8.000 F" -> 8000.0, "12,5" -> 12.5,
/// "Prix sur demande" -> None.
pub fn parse_price(raw: &str) -> Option<f64> {
    let m = RE_PRICE.find(raw)?;
    let compact: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.trim_end_matches(['.', ',']);

    let normalized = if RE_GROUPED.is_match(compact) {
        compact.replace(['.', ','], "")
    } else if compact.contains('.') && compact.contains(',') {
        // whichever separator comes last is the decimal one
        let (thousands, decimal) = if compact.rfind(',') > compact.rfind('.') {
            ('.', ',')
        } else {
            (',', '.')
        };
        compact.replace(thousands, "").replace(decimal, ".")
    } else {
        compact.replace(',', ".")
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

// -------------------------
// Cleaned rows
// -------------------------

/// A listing ready to be appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewListing {
    pub category: Category,
    #[serde(rename = "type")]
    pub item_type: String,
    pub raw_price: String,
    pub price: Option<f64>,
    pub kind: ItemKind,
    pub address: String,
    pub image_link: String,
    pub source_url: String,
}

pub fn clean_card(card: RawCard, category: Category) -> NewListing {
    let item_type = clean_text(&card.title);
    let raw_price = clean_text(&card.raw_price);
    NewListing {
        price: parse_price(&raw_price),
        kind: classify_kind(&item_type, category.default_kind()),
        category,
        item_type,
        raw_price,
        address: clean_text(&card.address),
        image_link: card.image_link.trim().to_string(),
        source_url: card.source_url.trim().to_string(),
    }
}

/// Identity of a listing: its URL, or its visible fields when it has none.
pub fn dedup_key(row: &NewListing) -> String {
    if !row.source_url.is_empty() {
        return row.source_url.clone();
    }
    format!(
        "{}|{}|{}|{}|{}",
        row.category, row.item_type, row.raw_price, row.address, row.image_link
    )
}

/// Drops rows whose key is already in `seen`, recording the new ones.
pub fn dedup_into(rows: Vec<NewListing>, seen: &mut HashSet<String>) -> Vec<NewListing> {
    rows.into_iter()
        .filter(|row| seen.insert(dedup_key(row)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(title: &str, price: &str, url: &str) -> RawCard {
        RawCard {
            title: title.to_string(),
            raw_price: price.to_string(),
            address: "  Dakar,\n  Sénégal ".to_string(),
            image_link: "https://images.example.com/a.jpg".to_string(),
            source_url: url.to_string(),
        }
    }

    #[test]
    fn parses_cfa_prices_with_spaces() {
        assert_eq!(parse_price("12 000 CFA"), Some(12000.0));
        assert_eq!(parse_price("1\u{a0}500\u{a0}000 FCFA"), Some(1_500_000.0));
        assert_eq!(parse_price("1\u{202f}250 CFA"), Some(1250.0));
        assert_eq!(parse_price("15000"), Some(15000.0));
    }

    #[test]
    fn parses_separator_variants() {
        assert_eq!(parse_price("8.000 F CFA"), Some(8000.0));
        assert_eq!(parse_price("25,000"), Some(25000.0));
        assert_eq!(parse_price("12,5 €"), Some(12.5));
        assert_eq!(parse_price("1.500,50"), Some(1500.5));
        assert_eq!(parse_price("1,500.50"), Some(1500.5));
        assert_eq!(parse_price("Prix: 3 500."), Some(3500.0));
    }

    #[test]
    fn leading_zero_group_is_a_decimal() {
        assert_eq!(parse_price("0,500"), Some(0.5));
        assert_eq!(parse_price("0.750 kg"), Some(0.75));
        assert_eq!(parse_price("1.500"), Some(1500.0));
    }

    #[test]
    fn no_digits_means_no_price() {
        assert_eq!(parse_price("Prix sur demande"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn classifies_by_keywords_then_fallback() {
        assert_eq!(classify_kind("Baskets Nike", ItemKind::Clothes), ItemKind::Shoes);
        assert_eq!(classify_kind("Chemise en lin", ItemKind::Shoes), ItemKind::Clothes);
        assert_eq!(classify_kind("T-SHIRT oversize", ItemKind::Other), ItemKind::Clothes);
        assert_eq!(classify_kind("Vêtements bébé", ItemKind::Other), ItemKind::Clothes);
        assert_eq!(classify_kind("Lot chaussures et pantalons", ItemKind::Other), ItemKind::Shoes);
        assert_eq!(classify_kind("Formule spéciale", ItemKind::Other), ItemKind::Other);
        assert_eq!(classify_kind("Article neuf", ItemKind::Shoes), ItemKind::Shoes);
    }

    #[test]
    fn basket_only_matches_as_a_whole_word() {
        assert_eq!(classify_kind("Maillot de basketball", ItemKind::Other), ItemKind::Clothes);
        assert_eq!(classify_kind("Basket montante", ItemKind::Clothes), ItemKind::Shoes);
        assert_eq!(classify_kind("Short basketteur", ItemKind::Other), ItemKind::Clothes);
    }

    #[test]
    fn clean_card_normalizes_fields() {
        let row = clean_card(
            card("  Sandales   cuir ", "7 500 CFA", " https://sn.coinafrique.com/annonce/1 "),
            Category::VetementsHomme,
        );
        assert_eq!(row.item_type, "Sandales cuir");
        assert_eq!(row.raw_price, "7 500 CFA");
        assert_eq!(row.price, Some(7500.0));
        assert_eq!(row.kind, ItemKind::Shoes);
        assert_eq!(row.address, "Dakar, Sénégal");
        assert_eq!(row.source_url, "https://sn.coinafrique.com/annonce/1");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = clean_card(card("Polo", "5 000", "https://x/1"), Category::VetementsHomme);
        let b = clean_card(card("Polo bleu", "6 000", "https://x/1"), Category::VetementsHomme);
        let c = clean_card(card("Jean", "9 000", ""), Category::VetementsHomme);
        let d = clean_card(card("Jean", "9 000", ""), Category::VetementsHomme);
        let e = clean_card(card("Jean", "9 500", ""), Category::VetementsHomme);

        let mut seen = HashSet::new();
        let out = dedup_into(vec![a.clone(), b, c.clone(), d], &mut seen);
        assert_eq!(out, vec![a.clone(), c.clone()]);

        // keys persist across calls within one run
        let out = dedup_into(vec![a, c, e.clone()], &mut seen);
        assert_eq!(out, vec![e]);
    }

    #[test]
    fn item_kind_parses_and_displays() {
        assert_eq!("Shoes".parse::<ItemKind>().unwrap(), ItemKind::Shoes);
        assert!("hats".parse::<ItemKind>().is_err());
        assert_eq!(ItemKind::Clothes.to_string(), "clothes");
    }
}
