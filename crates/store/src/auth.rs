use {tracing::info, uuid::Uuid};

use parley_routing::RoutingStore;

use crate::{
    Result,
    users::{User, UserRepo},
};

/// Registration, login, and token resolution. Sessions are opaque 128-bit
/// identifiers living in the routing store (`token → email`); the durable
/// store supplies the user record on resolution.
#[derive(Clone)]
pub struct AuthService {
    users: UserRepo,
    routing: RoutingStore,
    session_ttl_secs: u64,
}

impl AuthService {
    pub fn new(users: UserRepo, routing: RoutingStore, session_ttl_secs: u64) -> Self {
        Self {
            users,
            routing,
            session_ttl_secs,
        }
    }

    /// Create an account and immediately issue a session for it.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(User, String)> {
        let user = self.users.create(username, email, password).await?;
        let token = self.issue_session(email).await?;
        info!(user_id = user.id, username = %user.username, "account created");
        Ok((user, token))
    }

    /// Exchange credentials for a session token.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let user = self.users.verify_login(email, password).await?;
        let token = self.issue_session(email).await?;
        Ok((user, token))
    }

    /// Resolve a session token to a user. Expired, unknown, and orphaned
    /// tokens (email no longer in the durable store) all come back `None`.
    pub async fn resolve_token(&self, token: &str) -> Result<Option<User>> {
        let Some(email) = self.routing.get_session(token).await? else {
            return Ok(None);
        };
        self.users.find_by_email(&email).await
    }

    async fn issue_session(&self, email: &str) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.routing
            .put_session(&token, email, self.session_ttl_secs)
            .await?;
        Ok(token)
    }
}
