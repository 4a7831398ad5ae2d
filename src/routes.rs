use crate::{api::attendance, auth::middleware::auth_middleware};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

pub type RateLimit = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Built once so every worker shares the same limiter state.
pub fn rate_limit(requests_per_min: u32) -> anyhow::Result<RateLimit> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);

    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))
}

pub fn configure(cfg: &mut web::ServiceConfig, api_prefix: &str, limit: &RateLimit) {
    // Protected routes
    cfg.service(
        web::scope(api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(Governor::new(limit)) // rate limiting
            .service(
                web::scope("/attendance")
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(
                        web::resource("/check-out").route(web::post().to(attendance::check_out)),
                    )
                    .service(web::resource("/today").route(web::get().to(attendance::today)))
                    .service(web::resource("/history").route(web::get().to(attendance::history)))
                    .service(
                        web::resource("/geofence")
                            .route(web::get().to(attendance::geofence_status)),
                    )
                    // /attendance/{id}
                    .service(web::resource("/{id}").route(web::get().to(attendance::get_record))),
            ),
    );
}
