//! Request identity as seen by the caching layer
//!
//! Authentication itself happens upstream; whatever authenticates the request
//! inserts an [`AuthContext`] into the request extensions before the cache
//! middleware runs.

use std::net::IpAddr;

/// Authenticated context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// User ID (if authenticated)
    pub user_id: Option<String>,
    /// Client IP address
    pub client_ip: IpAddr,
}

impl AuthContext {
    /// Create a new unauthenticated context
    pub fn anonymous(client_ip: IpAddr) -> Self {
        Self {
            user_id: None,
            client_ip,
        }
    }

    /// Create a context for an authenticated user
    pub fn user(user_id: impl Into<String>, client_ip: IpAddr) -> Self {
        Self {
            user_id: Some(user_id.into()),
            client_ip,
        }
    }
}
