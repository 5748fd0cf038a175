pub mod auth;
pub mod candidate;
pub mod election;
pub mod id;
pub mod voter;
