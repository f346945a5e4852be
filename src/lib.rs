//! HTTP API for the municipal incident map.
//!
//! Serves the accident collection to the map front end, accepts new reports
//! (optionally with an image forwarded to the media host) and can restore
//! the collection to a configured default. Records live either in a local
//! JSON file or in a MongoDB collection.

pub mod config;
pub mod database;
pub mod media;
pub mod models;
pub mod routes;
pub mod service;

use std::{io, net::TcpListener, sync::Arc};

use actix_cors::Cors;
use actix_web::{
    http::StatusCode,
    middleware::{self, ErrorHandlers},
    web, App, HttpServer,
};

use crate::{
    config::Config,
    media::{CloudinaryUploader, MediaUploader},
    service::AccidentService,
};

/// Shared application state.
pub struct AppState {
    pub accidents: AccidentService,
    pub uploader: Arc<dyn MediaUploader>,
    /// Destination folder on the media host.
    pub media_folder: String,
    pub max_upload_bytes: usize,
    /// Reject candidates failing the form-layer checks instead of storing
    /// whatever parses.
    pub require_fields: bool,
}

/// Binds `addr:port`, moving on to the next port while the current one is
/// taken, for at most `attempts` ports.
///
/// # Errors
///
/// Returns the last `AddrInUse` error when every candidate port is taken, or
/// the first error of any other kind.
pub fn bind_with_fallback(addr: &str, port: u16, attempts: u16) -> io::Result<TcpListener> {
    let mut last_error = None;

    for offset in 0..attempts.max(1) {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((addr, candidate)) {
            Ok(listener) => {
                if offset > 0 {
                    log::warn!("Port {port} is busy, using {candidate} instead");
                }
                return Ok(listener);
            }
            Err(error) if error.kind() == io::ErrorKind::AddrInUse => {
                log::debug!("Port {candidate} is in use");
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrInUse, format!("no free port from {port}"))
    }))
}

/// Starts the incident map API server.
///
/// Reads the configuration from the environment, opens the record store and
/// serves the `/api` routes until shutdown. The caller provides the async
/// runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the record store cannot
/// be opened, or the HTTP server fails to bind or run.
pub async fn run_server() -> io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config =
        Config::from_env().map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
    let restore_target = config
        .restore_records()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    log::info!("Opening record store...");
    let store = database::connect(&config.store)
        .await
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;

    if config.media.cloud_name.is_none() {
        log::warn!("CLOUDINARY_CLOUD_NAME is not set, image uploads will fail");
    }

    let state = web::Data::new(AppState {
        accidents: AccidentService::new(store, config.id_policy, restore_target),
        uploader: Arc::new(CloudinaryUploader::new(config.media.clone())),
        media_folder: config.media.folder.clone(),
        max_upload_bytes: config.media.max_upload_bytes,
        require_fields: config.require_fields,
    });

    let listener = bind_with_fallback(&config.bind_addr, config.port, config.port_attempts)?;
    log::info!("Starting server on {}", listener.local_addr()?);

    HttpServer::new(move || {
        App::new()
            .wrap(
                ErrorHandlers::new()
                    .handler(StatusCode::INTERNAL_SERVER_ERROR, routes::render_internal_error),
            )
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .configure(|cfg| routes::configure(cfg, state.clone()))
    })
    .listen(listener)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_the_next_free_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let listener = bind_with_fallback("127.0.0.1", port, 20).unwrap();
        assert!(listener.local_addr().unwrap().port() > port);
    }

    #[test]
    fn single_attempt_reports_the_conflict() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let error = bind_with_fallback("127.0.0.1", port, 1).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::AddrInUse);
    }
}
