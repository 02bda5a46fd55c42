use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use url::Url;

use crate::clean::ItemKind;

/// The listing categories we scrape. The slug doubles as the value stored in
/// the `category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    VetementsHomme,
    ChaussuresHomme,
    VetementsEnfants,
    ChaussuresEnfants,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::VetementsHomme,
        Category::ChaussuresHomme,
        Category::VetementsEnfants,
        Category::ChaussuresEnfants,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Category::VetementsHomme => "vetements-homme",
            Category::ChaussuresHomme => "chaussures-homme",
            Category::VetementsEnfants => "vetements-enfants",
            Category::ChaussuresEnfants => "chaussures-enfants",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::VetementsHomme => "Vêtements homme",
            Category::ChaussuresHomme => "Chaussures homme",
            Category::VetementsEnfants => "Vêtements enfants",
            Category::ChaussuresEnfants => "Chaussures enfants",
        }
    }

    /// Kind assumed for a listing whose title gives no better hint.
    pub fn default_kind(self) -> ItemKind {
        match self {
            Category::VetementsHomme | Category::VetementsEnfants => ItemKind::Clothes,
            Category::ChaussuresHomme | Category::ChaussuresEnfants => ItemKind::Shoes,
        }
    }

    pub fn listing_url(self, base: &Url) -> Result<Url> {
        base.join(&format!("/categorie/{}", self.slug()))
            .with_context(|| format!("cannot build listing url for {}", self.slug()))
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == s)
            .ok_or_else(|| anyhow!("unknown category: {s:?}"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip_through_from_str() {
        for c in Category::ALL {
            assert_eq!(c.slug().parse::<Category>().unwrap(), c);
        }
        assert_eq!(" Chaussures-Homme ".parse::<Category>().unwrap(), Category::ChaussuresHomme);
        assert!("electronique".parse::<Category>().is_err());
    }

    #[test]
    fn listing_url_replaces_base_path() {
        let base = Url::parse("https://sn.coinafrique.com/some/where?x=1").unwrap();
        let url = Category::VetementsEnfants.listing_url(&base).unwrap();
        assert_eq!(url.as_str(), "https://sn.coinafrique.com/categorie/vetements-enfants");
    }

    #[test]
    fn serde_uses_slugs() {
        let json = serde_json::to_string(&Category::ChaussuresEnfants).unwrap();
        assert_eq!(json, "\"chaussures-enfants\"");
        let back: Category = serde_json::from_str("\"vetements-homme\"").unwrap();
        assert_eq!(back, Category::VetementsHomme);
        assert_eq!(Category::ChaussuresHomme.default_kind(), ItemKind::Shoes);
    }
}
