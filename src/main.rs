use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use esg_accounts::cli::{
    Args, build_config, connect_counters, init_logging, load_jwt_secret, open_database,
};
use esg_accounts::clock::{Clock, SystemClock};
use esg_accounts::{create_app, init_cleanup};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let Some(counters) = connect_counters(args.redis_url.as_deref(), clock.clone()).await else {
        std::process::exit(1);
    };

    if args.insecure_cookies {
        warn!("Cookies are sent without the Secure attribute");
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read listener address");
        std::process::exit(1);
    });

    let config = build_config(&args, db, jwt_secret, counters, clock);
    init_cleanup(&config);
    let app = create_app(&config);

    info!(address = %local_addr, "Listening");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
