//! Subcommand arguments and handlers

pub mod inspect;
pub mod update;
