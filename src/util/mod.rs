//! Stateless helpers shared by the validators.

pub mod feed;
pub mod geo;
pub mod time;
