//! Validation of externally issued credentials. Sign-in and token signing
//! belong to the credential issuer; this crate only verifies what it is
//! handed, using the shared signing secret.

use std::fmt::Display;
use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome, Request},
    State,
};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::config::Config;
use crate::error::Error;
use crate::model::common::election::VoterId;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// A user of our application, having defined rights.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
}

/// Marker type for voter credentials.
pub struct Voter;

/// Marker type for admin credentials.
pub struct Admin;

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;
}

/// An authentication token representing a specific user with specific rights.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    pub id: VoterId,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }

    /// The credential subject's ID.
    pub fn voter_id(&self) -> VoterId {
        self.id
    }
}

impl<U> AuthToken<U>
where
    U: User,
{
    /// Deserialize and verify a token from its wire form.
    pub fn from_raw(raw: &str, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            raw,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

/// Extract the raw token, from the `Authorization` header if present, else
/// from the auth cookie.
fn raw_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    if let Some(header) = req.headers().get_one("Authorization") {
        return header.strip_prefix("Bearer ");
    }
    req.cookies()
        .get(AUTH_TOKEN_COOKIE)
        .map(|cookie| cookie.value())
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the request and verify that it has the
    /// correct rights for this user type.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let raw = match raw_token(req) {
            Some(raw) => raw,
            None => {
                return Outcome::Failure((
                    Status::Unauthorized,
                    Error::unauthorized("No credentials presented"),
                ));
            }
        };

        // Decode the token.
        let token = match Self::from_raw(raw, config) {
            Ok(token) => token,
            Err(e) => return Outcome::Failure((Status::Unauthorized, e)),
        };

        // Check it represents the correct rights.
        if !token.permits(U::RIGHTS) {
            return Outcome::Failure((
                Status::Forbidden,
                Error::forbidden(format!("This action requires {} rights", U::RIGHTS)),
            ));
        }

        Outcome::Success(token)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    /// Issue a token the way the external credential issuer would.
    fn issue(id: VoterId, rights: Rights, expire_at: DateTime<Utc>, secret: &[u8]) -> String {
        let claims = Claims::<()> {
            token: AuthToken {
                id,
                rights,
                phantom: PhantomData,
            },
            expire_at,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn valid_tokens_decode() {
        let config = Config::example();
        let raw = issue(
            7,
            Rights::Voter,
            Utc::now() + chrono::Duration::hours(1),
            config.jwt_secret(),
        );
        let token = AuthToken::<Voter>::from_raw(&raw, &config).unwrap();
        assert_eq!(token.voter_id(), 7);
        assert!(token.permits(Rights::Voter));
        assert!(!token.permits(Rights::Admin));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let config = Config::example();
        let raw = issue(
            7,
            Rights::Voter,
            Utc::now() - chrono::Duration::hours(1),
            config.jwt_secret(),
        );
        assert!(AuthToken::<Voter>::from_raw(&raw, &config).is_err());
    }

    #[test]
    fn forged_tokens_are_rejected() {
        let config = Config::example();
        let raw = issue(
            7,
            Rights::Admin,
            Utc::now() + chrono::Duration::hours(1),
            b"not the shared secret",
        );
        assert!(AuthToken::<Admin>::from_raw(&raw, &config).is_err());
    }
}
