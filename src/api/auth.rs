use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{api::id::ApiId, audit::AuditContext, mongodb::Id};

const BEARER: &str = "Bearer ";

/// What a caller is allowed to do. Ordered by privilege.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Organizer,
    Admin,
}

/// Bearer token claims. Tokens are issued by the wider membership platform;
/// this service only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: ApiId,
    pub role: Role,
    #[serde(rename = "exp", with = "ts_seconds")]
    pub expire_at: DateTime<Utc>,
}

impl Claims {
    pub fn new(sub: Id, role: Role, ttl: Duration) -> Self {
        Self {
            sub: sub.into(),
            role,
            expire_at: Utc::now() + ttl,
        }
    }

    /// Sign these claims into a token.
    #[cfg(test)]
    #[allow(clippy::missing_panics_doc)]
    pub fn encode(&self, secret: &[u8]) -> String {
        use jsonwebtoken::{EncodingKey, Header};

        jsonwebtoken::encode(&Header::default(), self, &EncodingKey::from_secret(secret))
            .expect("JWT encoding is infallible with default settings")
    }

    /// Verify and decode a token.
    pub fn decode(token: &str, secret: &[u8]) -> Result<Self, Error> {
        jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(secret),
            &Validation::default(),
        )
        .map(|data: TokenData<Claims>| data.claims)
        .map_err(|e| Error::Unauthorized(e.to_string()))
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Id,
    pub role: Role,
}

impl Caller {
    /// The audit context for actions taken by this caller.
    pub fn context(&self, meta: &RequestMeta) -> AuditContext {
        AuditContext {
            actor_id: Some(self.id),
            ..meta.context()
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = Error;

    /// Read and verify the bearer token. Requests without one are forwarded,
    /// requests with a bad one fail.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((
                Status::InternalServerError,
                Error::Unauthorized("Authentication is not configured".to_string()),
            ));
        };

        let Some(header) = req.headers().get_one("Authorization") else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Some(token) = header.strip_prefix(BEARER) else {
            return Outcome::Error((
                Status::Unauthorized,
                Error::Unauthorized("Expected a bearer token".to_string()),
            ));
        };

        match Claims::decode(token, config.jwt_secret()) {
            Ok(claims) => Outcome::Success(Caller {
                id: claims.sub.into(),
                role: claims.role,
            }),
            Err(e) => {
                debug!("Rejected bearer token: {e}");
                Outcome::Error((Status::Unauthorized, e))
            }
        }
    }
}

/// A caller with at least organiser rights.
#[derive(Debug, Copy, Clone)]
pub struct Organizer(pub Caller);

/// A caller with admin rights.
#[derive(Debug, Copy, Clone)]
pub struct Admin(pub Caller);

/// Require a caller of at least `role`.
async fn require<'r>(req: &'r Request<'_>, role: Role) -> Outcome<Caller, Error> {
    let caller = try_outcome!(req.guard::<Caller>().await);
    if caller.role < role {
        return Outcome::Error((
            Status::Forbidden,
            Error::Forbidden(format!("Requires {role:?} rights")),
        ));
    }
    Outcome::Success(caller)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Organizer {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        require(req, Role::Organizer).await.map(Organizer)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Admin {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        require(req, Role::Admin).await.map(Admin)
    }
}

/// Where a request came from, for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// An anonymous audit context.
    pub fn context(&self) -> AuditContext {
        AuditContext {
            actor_id: None,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestMeta {
    type Error = (); // No errors possible.

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestMeta {
            ip_address: req.client_ip().map(|ip| ip.to_string()),
            user_agent: req.headers().get_one("User-Agent").map(str::to_string),
        })
    }
}
