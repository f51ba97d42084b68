//! Request correlation ids.

use tower_http::request_id::{MakeRequestId, RequestId};

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically in logs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = opsroom_core::new_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}
