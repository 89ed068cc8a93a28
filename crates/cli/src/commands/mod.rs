//! CLI subcommands

pub mod fetch_model;
pub mod predict;
pub mod remote;
