#[macro_use]
extern crate lazy_static;

pub mod api;
pub mod model;
pub mod points;
pub mod token_store;

pub use api::{Client, Error};
pub use token_store::TokenStore;
