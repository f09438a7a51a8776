//! Realtime room, presence and fan-out core of the huddle chat server.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod guard;
pub mod housekeeping;
pub mod hub;
pub mod identity;
pub mod members;
pub mod messages;
pub mod model;
pub mod presence;
pub mod reactions;
pub mod reads;
pub mod relay;
pub mod session;
pub mod store;
pub mod typing;
