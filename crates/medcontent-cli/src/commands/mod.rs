pub mod common;
pub mod hydrate;
pub mod list;
pub mod mutate;
pub mod pending;
pub mod watch;
