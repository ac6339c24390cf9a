//! Bearer-token identity
//!
//! The HTTP layer only needs to turn a token into a [`Principal`] and to
//! register new users; both sit behind [`IdentityProvider`] so a hosted auth
//! service can replace the in-memory provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::HealthError;
use crate::records::UserId;

const MIN_PASSWORD_LEN: usize = 6;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Principal { user_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    DuplicateEmail(String),
    InvalidInput(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::DuplicateEmail(email) => write!(f, "A user with email {} is already registered", email),
            AuthError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for HealthError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => HealthError::Unauthorized,
            other => HealthError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub access_token: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account. `token` pins the access token of a configured
    /// user, whose id is then derived from the email so it stays the same
    /// across restarts; otherwise a random token and id are issued.
    async fn register(&self, email: &str, password: &str, token: Option<String>) -> Result<Session, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn resolve(&self, token: &str) -> Option<Principal>;
}

struct Account {
    user_id: UserId,
    salt: String,
    password_hash: String,
}

/// Process-local accounts with salted SHA-256 password hashes. Suitable for
/// development and tests; state is lost on restart.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    tokens: RwLock<HashMap<String, UserId>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        MemoryIdentityProvider::default()
    }

    /// Tokens that resolve to a fixed user id without an account behind them.
    pub fn with_static_tokens(tokens: HashMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(token, user)| (token, UserId::from(user)))
            .collect();
        MemoryIdentityProvider {
            accounts: RwLock::new(HashMap::new()),
            tokens: RwLock::new(tokens),
        }
    }

    async fn issue(&self, user_id: &UserId, token: Option<String>) -> String {
        let token = token.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        self.tokens.write().await.insert(token.clone(), user_id.clone());
        token
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn register(&self, email: &str, password: &str, token: Option<String>) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AuthError::InvalidInput("email must contain '@'".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user_id = {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(&email) {
                return Err(AuthError::DuplicateEmail(email));
            }
            let user_id = if token.is_some() {
                seeded_user_id(&email)
            } else {
                UserId::new(Uuid::new_v4().to_string())
            };
            let salt = Uuid::new_v4().simple().to_string();
            let account = Account {
                user_id,
                password_hash: hash_password(&salt, password),
                salt,
            };
            let user_id = account.user_id.clone();
            accounts.insert(email.clone(), account);
            user_id
        };

        let access_token = self.issue(&user_id, token).await;
        info!(user = %user_id, "registered user");
        Ok(Session { user_id, access_token })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        let user_id = {
            let accounts = self.accounts.read().await;
            match accounts.get(&email) {
                Some(account) if hash_password(&account.salt, password) == account.password_hash => {
                    account.user_id.clone()
                }
                _ => {
                    warn!("rejected sign-in");
                    return Err(AuthError::InvalidCredentials);
                }
            }
        };

        let access_token = self.issue(&user_id, None).await;
        Ok(Session { user_id, access_token })
    }

    async fn resolve(&self, token: &str) -> Option<Principal> {
        self.tokens.read().await.get(token).cloned().map(Principal::new)
    }
}

/// Stable id of a configured account.
fn seeded_user_id(email: &str) -> UserId {
    UserId::new(Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("mailto:{}", email).as_bytes()).to_string())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// The token of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}
