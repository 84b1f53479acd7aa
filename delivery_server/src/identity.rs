//! Caller identity.
//!
//! Authentication happens upstream. The gateway in front of this server forwards who the caller is in two headers:
//! `X-User-Id` (a numeric user id) and `X-User-Role` (`customer`, `restaurant_owner`, `delivery_partner` or `admin`).
//! Handlers take an [`Identity`] argument to get at them. The headers are only honoured when
//! [`ServerOptions::trust_identity_headers`] is set.
use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header::HeaderMap, web, FromRequest, HttpRequest};
use delivery_engine::db_types::{Actor, Role, UserId};
use log::*;

use crate::{config::ServerOptions, errors::ServerError};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role)
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServerError> {
        let header = |name: &str| {
            headers
                .get(name)
                .ok_or_else(|| ServerError::Unauthenticated(format!("The {name} header is missing")))?
                .to_str()
                .map_err(|e| ServerError::Unauthenticated(format!("The {name} header is not readable. {e}")))
        };
        let user_id = header(USER_ID_HEADER)?
            .trim()
            .parse::<i64>()
            .map_err(|e| ServerError::Unauthenticated(format!("Invalid {USER_ID_HEADER}. {e}")))?;
        let role = header(USER_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|e| ServerError::Unauthenticated(format!("Invalid {USER_ROLE_HEADER}. {e}")))?;
        Ok(Self { user_id: UserId(user_id), role })
    }

    pub fn from_request_headers(req: &HttpRequest) -> Result<Self, ServerError> {
        let trusted = req.app_data::<web::Data<ServerOptions>>().map(|o| o.trust_identity_headers).unwrap_or(false);
        if !trusted {
            debug!("💻️ Refusing {} {}: identity headers are not trusted", req.method(), req.path());
            return Err(ServerError::Unauthenticated("This server does not accept identity headers".into()));
        }
        Self::from_headers(req.headers())
    }
}

impl FromRequest for Identity {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::from_request_headers(req))
    }
}
