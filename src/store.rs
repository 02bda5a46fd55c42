//! SQLite storage for scraped listings.
//!
//! One append-only `listings` table. Rows are never updated; re-scraping a
//! listing whose URL is already stored is a no-op.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;

use crate::{category::Category, clean::ItemKind, clean::NewListing};

/// A stored listing, as read back for display.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Listing {
    pub id: i64,
    pub category: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub item_type: String,
    pub raw_price: String,
    pub price: Option<f64>,
    pub kind: String,
    pub address: String,
    pub image_link: String,
    pub source_url: String,
}

/// Dashboard filters. Every field is optional; unset means "any".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingFilter {
    pub category: Option<Category>,
    pub kind: Option<ItemKind>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Substring match over type and address.
    #[serde(alias = "q")]
    pub search: Option<String>,
    pub limit: Option<u32>,
}

impl ListingFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.kind.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.search.as_deref().is_none_or(|s| s.trim().is_empty())
            && self.limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct CategorySummary {
    pub category: String,
    pub listings: i64,
    pub priced: i64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

const COLUMNS: &str =
    "id, category, type, raw_price, price, kind, address, image_link, source_url";

impl Store {
    /// Opens (creating if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url: {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .with_context(|| format!("failed to open {database_url}"))?;
        Ok(Self { pool })
    }

    /// Private in-memory database; a single long-lived connection keeps it alive.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory database")?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT '',
                raw_price TEXT NOT NULL DEFAULT '',
                price REAL,
                kind TEXT NOT NULL DEFAULT 'other',
                address TEXT NOT NULL DEFAULT '',
                image_link TEXT NOT NULL DEFAULT '',
                source_url TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create listings table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_source_url ON listings(source_url)")
            .execute(&self.pool)
            .await
            .context("failed to create source_url index")?;

        Ok(())
    }

    /// Appends `rows` in one transaction and returns how many were new.
    pub async fn insert_rows(&self, rows: &[NewListing]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for row in rows {
            let res = sqlx::query(
                r#"
                INSERT INTO listings
                    (category, type, raw_price, price, kind, address, image_link, source_url)
                SELECT ?, ?, ?, ?, ?, ?, ?, ?
                WHERE ? = '' OR NOT EXISTS (SELECT 1 FROM listings WHERE source_url = ?)
                "#,
            )
            .bind(row.category.slug())
            .bind(&row.item_type)
            .bind(&row.raw_price)
            .bind(row.price)
            .bind(row.kind.as_str())
            .bind(&row.address)
            .bind(&row.image_link)
            .bind(&row.source_url)
            .bind(&row.source_url)
            .bind(&row.source_url)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert listing {:?}", row.source_url))?;
            inserted += res.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn read_all(&self) -> Result<Vec<Listing>> {
        let rows = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {COLUMNS} FROM listings ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn query(&self, filter: &ListingFilter) -> Result<Vec<Listing>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM listings WHERE 1 = 1"));

        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.slug());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        if let Some(needle) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(needle));
            qb.push(" AND (type LIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR address LIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }
        qb.push(" ORDER BY id");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build_query_as::<Listing>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn summary(&self) -> Result<Vec<CategorySummary>> {
        let rows = sqlx::query_as::<_, CategorySummary>(
            r#"
            SELECT category,
                   COUNT(*) AS listings,
                   COUNT(price) AS priced,
                   AVG(price) AS avg_price,
                   MIN(price) AS min_price,
                   MAX(price) AS max_price
            FROM listings
            GROUP BY category
            ORDER BY category
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(category: Category, title: &str, price: Option<f64>, kind: ItemKind, url: &str) -> NewListing {
        NewListing {
            category,
            item_type: title.to_string(),
            raw_price: price.map(|p| format!("{p} CFA")).unwrap_or_else(|| "Prix sur demande".into()),
            price,
            kind,
            address: "Dakar, Sénégal".to_string(),
            image_link: String::new(),
            source_url: url.to_string(),
        }
    }

    async fn seeded() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        let rows = vec![
            row(Category::VetementsHomme, "Chemise lin", Some(8000.0), ItemKind::Clothes, "https://x/1"),
            row(Category::VetementsHomme, "Jean slim", Some(12000.0), ItemKind::Clothes, "https://x/2"),
            row(Category::ChaussuresHomme, "Baskets", Some(25000.0), ItemKind::Shoes, "https://x/3"),
            row(Category::ChaussuresEnfants, "Sandales", None, ItemKind::Shoes, "https://x/4"),
        ];
        assert_eq!(store.insert_rows(&rows).await.unwrap(), 4);
        store
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_all_returns_rows_in_insertion_order() {
        let store = seeded().await;
        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].item_type, "Chemise lin");
        assert_eq!(all[0].category, "vetements-homme");
        assert_eq!(all[0].kind, "clothes");
        assert_eq!(all[3].price, None);
        assert_eq!(all[3].raw_price, "Prix sur demande");
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn known_urls_are_not_appended_twice() {
        let store = seeded().await;
        let again = vec![
            row(Category::VetementsHomme, "Chemise lin", Some(7000.0), ItemKind::Clothes, "https://x/1"),
            row(Category::VetementsHomme, "Polo", Some(5000.0), ItemKind::Clothes, "https://x/5"),
        ];
        assert_eq!(store.insert_rows(&again).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn rows_without_url_are_always_appended() {
        let store = seeded().await;
        let anon = vec![row(Category::VetementsEnfants, "Body", Some(2000.0), ItemKind::Clothes, "")];
        assert_eq!(store.insert_rows(&anon).await.unwrap(), 1);
        assert_eq!(store.insert_rows(&anon).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn query_applies_filters() {
        let store = seeded().await;

        let shoes = store
            .query(&ListingFilter { kind: Some(ItemKind::Shoes), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(shoes.len(), 2);

        let mid = store
            .query(&ListingFilter {
                min_price: Some(10000.0),
                max_price: Some(20000.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].item_type, "Jean slim");

        let men = store
            .query(&ListingFilter {
                category: Some(Category::VetementsHomme),
                search: Some("chemise".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(men.len(), 1);

        let limited = store
            .query(&ListingFilter { limit: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn search_wildcards_match_literally() {
        let store = seeded().await;
        let rows = vec![
            row(Category::VetementsHomme, "Promo -50% chemise", Some(4000.0), ItemKind::Clothes, "https://x/6"),
            row(Category::VetementsHomme, "Polo taille_L", Some(6000.0), ItemKind::Clothes, "https://x/7"),
        ];
        store.insert_rows(&rows).await.unwrap();

        let search = |q: &str| ListingFilter { search: Some(q.into()), ..Default::default() };

        let percent = store.query(&search("50%")).await.unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].item_type, "Promo -50% chemise");

        assert_eq!(store.query(&search("%")).await.unwrap().len(), 1);
        let underscore = store.query(&search("_L")).await.unwrap();
        assert_eq!(underscore.len(), 1);
        assert_eq!(underscore[0].item_type, "Polo taille_L");
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
        assert_eq!(escape_like("chemise"), "chemise");
    }

    #[test]
    fn blank_search_counts_as_no_filter() {
        assert!(ListingFilter::default().is_empty());
        assert!(ListingFilter { search: Some("  ".into()), ..Default::default() }.is_empty());
        assert!(!ListingFilter { kind: Some(ItemKind::Other), ..Default::default() }.is_empty());
    }

    #[tokio::test]
    async fn summary_groups_by_category() {
        let store = seeded().await;
        let summary = store.summary().await.unwrap();
        assert_eq!(summary.len(), 3);

        let men = summary.iter().find(|s| s.category == "vetements-homme").unwrap();
        assert_eq!(men.listings, 2);
        assert_eq!(men.priced, 2);
        assert_eq!(men.avg_price, Some(10000.0));
        assert_eq!(men.min_price, Some(8000.0));

        let kids = summary.iter().find(|s| s.category == "chaussures-enfants").unwrap();
        assert_eq!(kids.priced, 0);
        assert_eq!(kids.avg_price, None);
    }
}
