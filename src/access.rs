use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::Mutex;

use crate::db::{Paste, User};
use crate::errors::{AuthError, Result};
use crate::repo::Repository;

/// Proof that a request presented a live token. Only [`AccessControl`] can
/// hand one out, so anything taking an `&Authorized` is gated on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    username: String,
}

impl Authorized {
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Registry of live tokens, loaded from the repository when the service
/// starts and updated on every refresh.
pub struct AccessControl {
    // token -> username
    tokens: RwLock<HashMap<String, String>>,
    // a refresh persists then installs; two of them must not interleave
    refreshing: Mutex<()>,
}

impl AccessControl {
    pub async fn load(repo: &Repository) -> Result<Self> {
        let users = repo.list_users().await?;
        log::info!("loaded tokens for {} users", users.len());
        Ok(Self::from_users(users))
    }

    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let tokens = users
            .into_iter()
            .filter_map(|user| user.token.map(|token| (token, user.username)))
            .collect();
        AccessControl {
            tokens: RwLock::new(tokens),
            refreshing: Mutex::new(()),
        }
    }

    pub fn authorize(&self, presented: Option<&str>) -> std::result::Result<Authorized, AuthError> {
        let presented = presented.ok_or(AuthError::NoToken)?;
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(presented)
            .map(|username| Authorized {
                username: username.clone(),
            })
            .ok_or(AuthError::InvalidToken)
    }

    /// Issue a new token for `username`. The previous one stops working as
    /// soon as this returns.
    pub async fn refresh_token(&self, repo: &Repository, username: &str) -> Result<String> {
        let _refreshing = self.refreshing.lock().await;
        let token = repo.refresh_token(username.to_string()).await?;

        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, holder| holder != username);
        tokens.insert(token.clone(), username.to_string());
        log::info!("refreshed token of {username}");
        Ok(token)
    }

    pub fn check_owner(
        &self,
        who: &Authorized,
        paste: &Paste,
    ) -> std::result::Result<(), AuthError> {
        if who.username == paste.owner {
            Ok(())
        } else {
            Err(AuthError::NotOwner(
                paste.id.clone(),
                who.username.clone(),
            ))
        }
    }
}
