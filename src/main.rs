use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use codebox::api::{configure_routes, AppState};
use codebox::{banner, config, database};
use rust_embed::RustEmbed;
use std::borrow::Cow;

#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    banner::print_banner();

    if let Err(e) = dotenvy::dotenv() {
        eprintln!("⚠️  No .env file loaded ({}); using the process environment", e);
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_config = config::AppConfig::from_env().map_err(|e| {
        log::error!("{}", e);
        std::io::Error::other(e.to_string())
    })?;

    std::fs::create_dir_all(&app_config.workspace_dir)?;
    log::info!("Workspace root: {}", app_config.workspace_dir.display());

    let db_pool = match database::init_db(app_config.database_url.as_deref()).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::error!("Database unavailable, execution history disabled: {}", e);
            None
        }
    };

    if !app_config.auth.enabled() {
        log::warn!("AUTH_USERS is not set; the API is open to anyone who can reach it");
    }

    let state = AppState::new(app_config.clone(), db_pool).map_err(|e| {
        log::error!("{}", e);
        std::io::Error::other(e.to_string())
    })?;
    let shutdown_state = state.clone();

    let bind = (app_config.host.clone(), app_config.port);
    println!("🚀 Starting server on http://{}:{} ({} sandbox)", bind.0, bind.1, state.sandbox.backend_name());

    let api_prefix = app_config.api_prefix.clone();
    let cors_origins = app_config.cors_origins.clone();
    HttpServer::new(move || {
        let cors = if cors_origins.iter().any(|o| o == "*") {
            Cors::permissive()
        } else {
            cors_origins
                .iter()
                .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
        };

        let prefix = api_prefix.clone();
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(move |cfg| configure_routes(cfg, &prefix))
            .route("/{_:.*}", web::get().to(static_file_handler))
    })
    .bind(bind)?
    .run()
    .await?;

    log::info!("Shutting down, cleaning up sandbox resources");
    shutdown_state.sandbox.cleanup().await;
    log::info!("Application shutdown complete");
    Ok(())
}

async fn static_file_handler(req: HttpRequest) -> impl Responder {
    let path = if req.path() == "/" {
        "index.html"
    } else {
        &req.path()[1..]
    };

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            HttpResponse::Ok().content_type(mime.as_ref()).body(Cow::into_owned(content.data))
        }
        None => HttpResponse::NotFound().body("404 Not Found"),
    }
}
