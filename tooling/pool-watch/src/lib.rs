//! Mining-pool fleet monitor: polls each pool's stats API, derives the
//! consensus chain height and pages watchers when a pool goes down, forks
//! off, or the whole network stops moving.

pub mod alerter;
pub mod bot;
pub mod commands;
pub mod composer;
pub mod config;
pub mod consensus;
pub mod detector;
pub mod dialect;
pub mod fetcher;
pub mod models;
pub mod roster;
pub mod service;
pub mod store;
pub mod stuck;
pub mod watchers;
