use std::sync::Arc;

use axum::{Router, middleware::from_fn};
use tracing::info;

use crate::{
    app_state::AppState,
    handlers::{conversations, media, members, push, rooms, streaming},
    middleware::auth::require_member,
};

/// Member-facing API; every route requires an authenticated member.
pub fn create_api_router() -> Router<Arc<AppState>> {
    info!("Creating API router");
    Router::new()
        .merge(conversations::routes())
        .merge(rooms::routes())
        .merge(push::routes())
        .merge(media::routes())
        .merge(members::routes())
        .merge(streaming::routes())
        .route_layer(from_fn(require_member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_router_has_routes() {
        assert!(create_api_router().has_routes());
    }
}
