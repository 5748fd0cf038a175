mod token;

pub use token::{AdminToken, AuthToken, AUTH_HEADER, BEARER_PREFIX};
