use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    image::ImageHost,
    store::{Db, MemoryStore, MongoStore},
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    admin_emails: Vec<String>,
    max_image_bytes: u64,
    #[serde(default)]
    allowed_origins: Vec<String>,
    #[serde(default)]
    image_upload_url: Option<String>,
    #[serde(default)]
    image_upload_preset: Option<String>,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Valid lifetime of login tokens in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Does an account registered under this email get admin rights?
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }

    /// Largest image, in bytes, accepted for an election or candidate.
    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_bytes
    }

    /// Origins allowed to call the API from a browser.
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Unsigned-upload endpoint of the image host. Without one, images are
    /// accepted but not stored anywhere.
    pub fn image_upload_url(&self) -> Option<&str> {
        self.image_upload_url.as_deref()
    }

    pub fn image_upload_preset(&self) -> Option<&str> {
        self.image_upload_preset.as_deref()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which backend holds voters, elections and candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// MongoDB; requires a replica set for transactions.
    Mongodb,
    /// In-process tables, lost on shutdown.
    Memory,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    storage: StorageKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
}

fn default_db_name() -> String {
    "ballot_box".to_string()
}

/// A fairing that loads the store config, connects to the database if
/// needed, performs any setup necessary, and places a [`Db`] into managed state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let db = match config.storage {
            StorageKind::Memory => {
                warn!("Using in-memory storage; nothing will survive a restart");
                Db::new(MemoryStore::default())
            }
            StorageKind::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set when `storage` is \"mongodb\"");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&db_uri, &config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Db::new(store)
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };

        // Manage the state.
        rocket = rocket.manage(db);
        Ok(rocket)
    }
}

/// A fairing that builds the image host client from the application config.
/// Must be attached after [`ConfigFairing`].
pub struct ImageHostFairing;

#[rocket::async_trait]
impl Fairing for ImageHostFairing {
    fn info(&self) -> Info {
        Info {
            name: "Image host",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Image host needs the application config to be loaded first");
            return Err(rocket);
        };
        let host = match ImageHost::from_config(config) {
            Ok(host) => host,
            Err(e) => {
                error!("Failed to set up image host: {e}");
                return Err(rocket);
            }
        };

        rocket = rocket.manage(host);
        Ok(rocket)
    }
}
