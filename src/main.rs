use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod category;
mod clean;
mod config;
mod extract;
mod fetch;
mod pipeline;
mod routes;
mod store;

use category::Category;
use clean::ItemKind;
use config::Config;
use fetch::HttpFetcher;
use pipeline::{Pipeline, ScrapeRequest};
use store::{ListingFilter, Store};

#[derive(Parser)]
#[command(name = "coinscrape")]
#[command(about = "Scrape, clean and store classified clothing/shoe listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and dashboard (default)
    Serve,

    /// Scrape one category, or `all`, into the database
    Scrape {
        /// Category slug (e.g. vetements-homme) or `all`
        category: String,

        /// Number of pages to walk
        #[arg(short, long)]
        pages: Option<usize>,

        /// Follow next-page links instead of counting pages
        #[arg(long)]
        follow_next: bool,
    },

    /// Print stored listings as JSON lines
    List {
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        kind: Option<ItemKind>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        /// Substring match over type and address
        #[arg(short = 'q', long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Per-category counts and prices
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coinscrape=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let store = Store::connect(&config.database_url).await?;
    store.init().await?;
    tracing::debug!(database = %config.database_url, rows = store.count().await?, "database ready");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, store).await,
        Commands::Scrape {
            category,
            pages,
            follow_next,
        } => {
            let categories = if category.eq_ignore_ascii_case("all") {
                Category::ALL.to_vec()
            } else {
                vec![category.parse()?]
            };
            let pipeline = Pipeline::new(HttpFetcher::new(config.http_timeout)?, store, &config)?;
            for category in categories {
                let req = ScrapeRequest {
                    pages,
                    follow_next,
                    ..ScrapeRequest::new(category)
                };
                match pipeline.run(&req).await {
                    Ok(report) => println!("{}", serde_json::to_string(&report)?),
                    Err(e) => tracing::error!(%category, error = %format!("{e:#}"), "scrape failed"),
                }
            }
            Ok(())
        }
        Commands::List {
            category,
            kind,
            min_price,
            max_price,
            search,
            limit,
        } => {
            let filter = ListingFilter {
                category,
                kind,
                min_price,
                max_price,
                search,
                limit,
            };
            let rows = if filter.is_empty() {
                store.read_all().await?
            } else {
                store.query(&filter).await?
            };
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
            Ok(())
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.summary().await?)?);
            Ok(())
        }
    }
}

async fn serve(config: Config, store: Store) -> Result<()> {
    let (host, port) = config.bind();
    let state = web::Data::new(routes::AppState {
        pipeline: Pipeline::new(HttpFetcher::new(config.http_timeout)?, store, &config)?,
    });

    tracing::info!("Starting coinscrape on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(routes::configure::<HttpFetcher>)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {host}:{port}"))?
    .run()
    .await
    .context("Server error")?;

    Ok(())
}
