#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod access;
pub mod blob;
pub mod conf;
pub mod db;
pub mod errors;
pub mod id;
pub mod repo;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sniff;
pub mod upload;

pub use service::Pimbin;
