pub mod candidate;
pub mod election;
pub mod voter;
