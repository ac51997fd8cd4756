//! Switchboard - a Slack workspace bot.
//!
//! This library provides the shared core for the three bot processes:
//! the gateway (signed event ingress), the consumer (stream dispatch and
//! handler registry), and bgtasks (background pollers).

pub mod cache;
pub mod config;
pub mod glossary;
pub mod handler;
pub mod heartbeat;
pub mod mparser;
pub mod poller;
pub mod queue;
pub mod server;
pub mod signing;
pub mod slack;
