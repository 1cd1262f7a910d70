use std::future::{Ready, ready};

use actix_web::{FromRequest, HttpRequest, dev::Payload, error::ErrorBadRequest};

pub const ACTOR_HEADER: &str = "X-Actor-Id";

/// The user a command is performed on behalf of, taken from `X-Actor-Id`.
/// Identity is trusted as given; authentication happens upstream.
pub struct Actor {
    pub id: u64,
}

impl FromRequest for Actor {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let raw = match req
            .headers()
            .get(ACTOR_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            Some(raw) => raw,
            None => return ready(Err(ErrorBadRequest("Missing X-Actor-Id header"))),
        };

        match raw.trim().parse::<u64>() {
            Ok(id) if id > 0 => ready(Ok(Actor { id })),
            _ => ready(Err(ErrorBadRequest("Invalid X-Actor-Id header"))),
        }
    }
}
