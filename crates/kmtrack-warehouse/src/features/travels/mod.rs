//! Travel lifecycle feature

pub mod commands;
