//! Dashboard reporting feature

pub mod queries;
