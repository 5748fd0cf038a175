//! Shared setup for tests: configuration, a Rocket over a given store, and
//! logged-in sessions. Used by the `backend_test` macro.

use std::sync::Once;

use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
};
use rocket::{
    figment::Figment,
    http::{ContentType, Header, Status},
    local::asynchronous::Client,
    serde::json::serde_json::json,
    Build, Rocket,
};

use crate::model::{
    api::{
        auth::{AUTH_HEADER, BEARER_PREFIX},
        candidate::{CandidateAdded, CandidateDescription},
        election::{ElectionChanged, ElectionDescription},
        id::ApiId,
        voter::{LoginResponse, Registration},
    },
    mongodb::Id,
    store::Db,
};

/// Configuration for tests, independent of `Rocket.toml`.
pub fn test_figment() -> Figment {
    Figment::from(rocket::Config::debug_default())
        .merge(("log_level", "off"))
        .merge(("jwt_secret", "not a secret, only for tests"))
        .merge(("auth_ttl", 3600))
        .merge(("admin_emails", ["admin@gmail.com"]))
        .merge(("max_image_bytes", 64))
        .merge(("allowed_origins", ["http://localhost:3000"]))
        .merge(("storage", "memory"))
}

/// A test Rocket serving from the given store.
pub fn rocket_for_store(db: Db) -> Rocket<Build> {
    rocket_for(test_figment(), db)
}

/// A test Rocket with its own configuration, serving from the given store.
pub fn rocket_for(figment: Figment, db: Db) -> Rocket<Build> {
    crate::assemble(rocket::custom(figment)).manage(db)
}

/// Log warnings and above to stderr, once per test binary.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let console = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("{l} {M} - {m}{n}")))
            .build();
        let config = log4rs::Config::builder()
            .appender(Appender::builder().build("console", Box::new(console)))
            .logger(Logger::builder().build("rocket", LevelFilter::Error))
            .logger(Logger::builder().build("_", LevelFilter::Error))
            .build(Root::builder().appender("console").build(LevelFilter::Warn));
        if let Ok(config) = config {
            // Fails only if another logger got there first, which is fine.
            let _ = log4rs::init_config(config);
        }
    });
}

/// A logged-in voter.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Id,
    pub token: String,
    pub is_admin: bool,
}

impl Session {
    /// The `Authorization` header carrying this session's token.
    pub fn header(&self) -> Header<'static> {
        Header::new(AUTH_HEADER, format!("{BEARER_PREFIX}{}", self.token))
    }
}

pub async fn register(client: &Client, registration: &Registration) -> Status {
    client
        .post(uri!(crate::api::voter::register))
        .header(ContentType::JSON)
        .body(json!(registration).to_string())
        .dispatch()
        .await
        .status()
}

/// Register the given voter and log them in.
pub async fn login(client: &Client, registration: &Registration) -> Session {
    assert_eq!(Status::Created, register(client, registration).await);
    let response = client
        .post(uri!(crate::api::voter::login))
        .header(ContentType::JSON)
        .body(json!(registration.credentials()).to_string())
        .dispatch()
        .await;
    assert_eq!(Status::Ok, response.status());
    let login: LoginResponse = response.into_json().await.unwrap();
    Session {
        id: *login.id,
        token: login.token,
        is_admin: login.is_admin,
    }
}

pub async fn login_admin(client: &Client) -> Session {
    login(client, &Registration::admin_example()).await
}

pub async fn login_voter(client: &Client) -> Session {
    login(client, &Registration::example()).await
}

/// Encode form fields as `application/x-www-form-urlencoded`.
pub fn form_body(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{name}={}", encode_form_value(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_form_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' => (b as char).to_string(),
            b' ' => "+".to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// A small "image", well within the test size limit.
pub const SMALL_IMAGE: &str = "PNG not really";

/// Create an election through the API as the given admin.
pub async fn create_election(client: &Client, admin: &Session, title: &str) -> ElectionDescription {
    let response = client
        .post(uri!(crate::api::election::create_election))
        .header(admin.header())
        .header(ContentType::Form)
        .body(form_body(&[
            ("title", title),
            ("description", "Who runs the club next year"),
            ("club", SMALL_IMAGE),
        ]))
        .dispatch()
        .await;
    assert_eq!(Status::Created, response.status());
    let created: ElectionChanged = response.into_json().await.unwrap();
    created.election
}

/// Add a candidate through the API as the given admin.
pub async fn create_candidate(
    client: &Client,
    admin: &Session,
    election: ApiId,
    full_name: &str,
) -> CandidateDescription {
    let election = election.to_string();
    let response = client
        .post(uri!(crate::api::candidate::create_candidate))
        .header(admin.header())
        .header(ContentType::Form)
        .body(form_body(&[
            ("fullName", full_name),
            ("motto", "Every vote counts"),
            ("currentElection", election.as_str()),
            ("image", SMALL_IMAGE),
        ]))
        .dispatch()
        .await;
    assert_eq!(Status::Created, response.status());
    let added: CandidateAdded = response.into_json().await.unwrap();
    added.candidate
}
