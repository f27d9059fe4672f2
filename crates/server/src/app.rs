use axum::routing::post;
use axum::Router;
use enrolla_core::store::CommerceStore;
use enrolla_db::DbPool;

use crate::admin::expire_waitlist_offers;
use crate::api::AppState;
use crate::health;
use crate::webhooks::payment_webhook;

pub fn router<S: CommerceStore>(state: AppState<S>, db_pool: DbPool) -> Router {
    Router::new()
        .route("/webhooks/payment", post(payment_webhook::<S>))
        .route("/admin/waitlist/expire", post(expire_waitlist_offers::<S>))
        .with_state(state)
        .merge(health::router(db_pool))
}
