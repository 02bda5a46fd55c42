use actix_web::{HttpResponse, Responder, get, web};
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    fetch::PageSource,
    pipeline::{PageReport, Pipeline, ScrapeRequest},
    store::{ListingFilter, Store},
};

pub struct AppState<S> {
    pub pipeline: Pipeline<S>,
}

impl<S: PageSource> AppState<S> {
    fn store(&self) -> &Store {
        self.pipeline.store()
    }
}

/// Registers every route against an `AppState<S>` held in app data.
pub fn configure<S: PageSource + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(healthz)
        .route("/scrape", web::post().to(scrape_endpoint::<S>))
        .route("/scrape/stream", web::get().to(scrape_stream::<S>))
        .route("/listings", web::get().to(listings::<S>))
        .route("/stats", web::get().to(stats::<S>))
        .service(dashboard);
}

fn error_json(e: &anyhow::Error) -> serde_json::Value {
    serde_json::json!({ "error": format!("{e:#}") })
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "coinscrape online.\n\
         Scrape:\n  POST /scrape {\"category\":\"vetements-homme\",\"pages\":5}\n\
         Stream:\n  GET  /scrape/stream?category=vetements-homme&pages=5 (SSE)\n\
         Data:\n  GET  /listings?category=..&kind=..&min_price=..&max_price=..&q=..&limit=..\n  GET  /stats\n\
         UI:\n  GET  /dashboard",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

async fn scrape_endpoint<S: PageSource>(
    state: web::Data<AppState<S>>,
    body: web::Json<ScrapeRequest>,
) -> impl Responder {
    match state.pipeline.run(&body).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "scrape failed");
            HttpResponse::BadRequest().json(error_json(&e))
        }
    }
}

async fn listings<S: PageSource>(
    state: web::Data<AppState<S>>,
    q: web::Query<ListingFilter>,
) -> impl Responder {
    match state.store().query(&q).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => HttpResponse::InternalServerError().json(error_json(&e)),
    }
}

async fn stats<S: PageSource>(state: web::Data<AppState<S>>) -> impl Responder {
    match state.store().summary().await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => HttpResponse::InternalServerError().json(error_json(&e)),
    }
}

// --------------
// SSE streaming
// --------------

fn sse_event(event: &str, data: &serde_json::Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

async fn scrape_stream<S: PageSource + 'static>(
    state: web::Data<AppState<S>>,
    q: web::Query<ScrapeRequest>,
) -> impl Responder {
    let (tx, mut rx) = mpsc::channel::<Bytes>(32);
    let req = q.into_inner();

    actix_web::rt::spawn(async move {
        let _ = tx
            .send(sse_event(
                "start",
                &serde_json::json!({ "category": req.category, "pages": req.pages }),
            ))
            .await;

        let (page_tx, mut page_rx) = mpsc::channel::<PageReport>(8);
        let forward = {
            let tx = tx.clone();
            async move {
                while let Some(page) = page_rx.recv().await {
                    let payload = serde_json::to_value(&page).unwrap_or_default();
                    let _ = tx.send(sse_event("page", &payload)).await;
                }
            }
        };
        let run = async {
            let result = state.pipeline.run_with_progress(&req, Some(&page_tx)).await;
            drop(page_tx);
            result
        };

        let (result, ()) = tokio::join!(run, forward);
        let event = match result {
            Ok(report) => sse_event("done", &serde_json::to_value(&report).unwrap_or_default()),
            Err(e) => sse_event("error", &error_json(&e)),
        };
        let _ = tx.send(event).await;
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

// -------------------------
// Tiny HTML dashboard
// -------------------------

#[get("/dashboard")]
async fn dashboard() -> impl Responder {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/html; charset=utf-8"))
        .body(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html lang="fr" class="dark">
<head>
  <meta charset="utf-8" />
  <title>coinscrape</title>
  <script src="https://cdn.tailwindcss.com"></script>
  <script defer src="https://unpkg.com/alpinejs@3.x.x/dist/cdn.min.js"></script>
  <meta name="viewport" content="width=device-width, initial-scale=1" />
</head>
<body class="bg-slate-900 text-slate-100 antialiased">
  <main class="max-w-6xl mx-auto p-6 flex flex-col gap-6 h-dvh" x-data="board()" x-init="load()">
    <h1 class="text-3xl font-bold tracking-tight">coinscrape</h1>

    <div class="bg-slate-800 ring-1 ring-slate-700 rounded-xl p-4 grid grid-cols-2 md:grid-cols-6 gap-3 text-sm">
      <select x-model="f.category" class="bg-slate-900 rounded px-2 py-1">
        <option value="">All categories</option>
        <option>vetements-homme</option><option>chaussures-homme</option>
        <option>vetements-enfants</option><option>chaussures-enfants</option>
      </select>
      <select x-model="f.kind" class="bg-slate-900 rounded px-2 py-1">
        <option value="">All kinds</option><option>clothes</option><option>shoes</option><option>other</option>
      </select>
      <input x-model.number="f.min_price" type="number" placeholder="min price" class="bg-slate-900 rounded px-2 py-1">
      <input x-model.number="f.max_price" type="number" placeholder="max price" class="bg-slate-900 rounded px-2 py-1">
      <input x-model="f.q" type="text" placeholder="search" class="bg-slate-900 rounded px-2 py-1">
      <div class="flex gap-2">
        <button @click="load()" class="px-2 py-1 rounded bg-indigo-600">Filter</button>
        <button @click="scrape()" :disabled="running || !f.category" class="px-2 py-1 rounded bg-slate-700 disabled:opacity-50"
                x-text="running ? 'Scraping…' : 'Scrape'"></button>
      </div>
    </div>

    <div class="text-sm text-slate-300 flex gap-6">
      <template x-for="s in stats" :key="s.category">
        <div><span class="font-semibold" x-text="s.category"></span>:
          <span x-text="s.listings"></span> rows, avg <span x-text="s.avg_price ? Math.round(s.avg_price) : '-'"></span></div>
      </template>
      <div x-text="log"></div>
    </div>

    <div class="bg-slate-800 ring-1 ring-slate-700 rounded-xl p-4 flex-1 min-h-0 overflow-y-auto">
      <table class="min-w-full text-sm">
        <thead class="bg-slate-700 sticky top-0">
          <tr class="text-left">
            <th class="px-3 py-2">#</th><th class="px-3 py-2">Category</th><th class="px-3 py-2">Type</th>
            <th class="px-3 py-2">Kind</th><th class="px-3 py-2">Price</th><th class="px-3 py-2">Address</th>
            <th class="px-3 py-2">Image</th><th class="px-3 py-2">URL</th>
          </tr>
        </thead>
        <tbody>
          <template x-for="r in rows" :key="r.id">
            <tr class="border-t border-slate-700">
              <td class="px-3 py-2" x-text="r.id"></td>
              <td class="px-3 py-2" x-text="r.category"></td>
              <td class="px-3 py-2" x-text="r.type"></td>
              <td class="px-3 py-2" x-text="r.kind"></td>
              <td class="px-3 py-2 tabular-nums" x-text="r.price ?? r.raw_price"></td>
              <td class="px-3 py-2" x-text="r.address"></td>
              <td class="px-3 py-2"><img x-show="r.image_link" :src="r.image_link" class="h-10"></td>
              <td class="px-3 py-2"><a class="text-indigo-400 hover:underline" :href="r.source_url" target="_blank">open</a></td>
            </tr>
          </template>
        </tbody>
      </table>
    </div>
  </main>

  <script>
    function board() {
      return {
        f: { category: '', kind: '', min_price: '', max_price: '', q: '' },
        rows: [], stats: [], log: '', running: false,
        async load() {
          const qs = new URLSearchParams(Object.entries(this.f).filter(([, v]) => v !== '' && v !== null));
          this.rows = await (await fetch(`/listings?${qs}`)).json();
          this.stats = await (await fetch('/stats')).json();
        },
        scrape() {
          this.running = true;
          const es = new EventSource(`/scrape/stream?category=${this.f.category}`);
          es.addEventListener('page', (ev) => { const d = JSON.parse(ev.data); this.log = `page ${d.page}: ${d.inserted} new`; });
          const stop = (ev) => { this.log = ev.data || 'connection error'; this.running = false; es.close(); this.load(); };
          es.addEventListener('done', stop);
          es.addEventListener('error', stop);
        },
      }
    }
  </script>
</body>
</html>
"#;
