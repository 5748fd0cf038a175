use argon2::Config as HashConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::id::{api_ids, ApiId},
    db::voter::{NewVoter, Voter},
};

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String> {
    // 16 bytes is recommended for password hashing:
    //  https://en.wikipedia.org/wiki/Argon2
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    let hash = argon2::hash_encoded(password.as_bytes(), &salt, &HashConfig::default())?;
    Ok(hash)
}

/// Lowercase and trim an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validation(message: &str) -> Error {
    Error::Validation(message.to_string())
}

/// A registration form, received from a user. Missing fields deserialize as
/// empty so that they get the same message as blank ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

impl Registration {
    /// Every field must be filled in.
    pub fn check_complete(&self) -> Result<()> {
        let fields = [&self.full_name, &self.email, &self.password, &self.password2];
        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(validation("Fill in all fields."));
        }
        Ok(())
    }

    /// The password must be long enough and typed the same way twice.
    pub fn check_password(&self) -> Result<()> {
        if self.password.trim().chars().count() < MIN_PASSWORD_LENGTH {
            return Err(validation("Password should atleast 6 characters."));
        }
        if self.password != self.password2 {
            return Err(validation("Passwords do not match"));
        }
        Ok(())
    }

    pub fn email(&self) -> String {
        normalize_email(&self.email)
    }

    /// Convert into a voter to store, hashing the password. Admin rights come
    /// from the configured admin email list.
    pub fn into_voter(self, config: &Config) -> Result<NewVoter> {
        let email = self.email();
        Ok(NewVoter {
            full_name: self.full_name.trim().to_string(),
            is_admin: config.is_admin_email(&email),
            password_hash: hash_password(&self.password)?,
            email,
            voted_elections: Vec::new(),
        })
    }
}

/// Login credentials, received from a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn check_complete(&self) -> Result<()> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(validation("Fill in all fields."));
        }
        Ok(())
    }

    /// The message for any failed login, so as not to reveal which emails exist.
    pub fn invalid() -> Error {
        validation("Invalid credentials.")
    }
}

/// Response to a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub id: ApiId,
    pub voted_elections: Vec<ApiId>,
    pub is_admin: bool,
}

/// A voter as shown through the API: everything except the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterDescription {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub full_name: String,
    pub email: String,
    pub is_admin: bool,
    pub voted_elections: Vec<ApiId>,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id.into(),
            voted_elections: api_ids(&voter.voted_elections),
            full_name: voter.voter.full_name,
            email: voter.voter.email,
            is_admin: voter.voter.is_admin,
        }
    }
}
