pub mod api;
pub mod db;
pub mod image;
pub mod mongodb;
pub mod store;
