//! Actor identity resolution and counter key generation.

use async_trait::async_trait;
use std::fmt;

use super::action::{ActionType, Role};
use crate::error::Result;

/// Default namespace prefixed to every counter key.
pub const DEFAULT_NAMESPACE: &str = "rate_limit";

/// Identifier used when neither a user id nor a client IP is known.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// How the user part of an actor should be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Ask the session resolver for the current user
    Session,
    /// Use this user id without a lookup
    User(String),
    /// Key by client IP without a lookup
    Anonymous,
}

/// The party performing a rate-limited action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub identity: Identity,
    /// Client IP as extracted by the caller
    pub ip: Option<String>,
    pub role: Role,
}

impl Actor {
    /// An actor whose user is taken from the current session.
    pub fn session(ip: Option<String>) -> Self {
        Self {
            identity: Identity::Session,
            ip,
            role: Role::Standard,
        }
    }

    /// An actor with an explicit user id.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            identity: Identity::User(user_id.into()),
            ip: None,
            role: Role::Standard,
        }
    }

    /// An actor keyed by IP even if a session exists.
    pub fn anonymous(ip: Option<String>) -> Self {
        Self {
            identity: Identity::Anonymous,
            ip,
            role: Role::Standard,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Resolve this actor to a counter identifier.
    ///
    /// Only `Identity::Session` consults the resolver.
    pub async fn resolve(&self, resolver: &dyn IdentityResolver) -> Result<Identifier> {
        let user_id = match &self.identity {
            Identity::User(id) => Some(id.clone()),
            Identity::Anonymous => None,
            Identity::Session => resolver.current_user_id().await?,
        };

        Ok(match (user_id, &self.ip) {
            (Some(id), _) => Identifier::User(id),
            (None, Some(ip)) if !ip.is_empty() && ip != UNKNOWN_IDENTIFIER => {
                Identifier::Ip(ip.clone())
            }
            (None, _) => Identifier::Unknown,
        })
    }
}

/// The resolved identity a counter is kept for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    User(String),
    Ip(String),
    Unknown,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::User(id) => write!(f, "user:{}", id),
            Identifier::Ip(ip) => write!(f, "ip:{}", ip),
            Identifier::Unknown => f.write_str(UNKNOWN_IDENTIFIER),
        }
    }
}

/// Address of one counter in a store.
///
/// Format: `{namespace}:{action}:{identifier}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub namespace: String,
    pub action: ActionType,
    pub identifier: Identifier,
}

impl RateLimitKey {
    pub fn new(namespace: &str, action: ActionType, identifier: Identifier) -> Self {
        Self {
            namespace: namespace.to_string(),
            action,
            identifier,
        }
    }

    pub fn to_store_key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.action, self.identifier)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

/// Looks up the authenticated user for the current request.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The current user's id, or `None` for an anonymous session.
    async fn current_user_id(&self) -> Result<Option<String>>;
}

/// A resolver for contexts without sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSession;

#[async_trait]
impl IdentityResolver for NoSession {
    async fn current_user_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
