#![cfg_attr(not(test), forbid(unsafe_code))]

//! Parley server: direct conversations, rooms, paginated history, live
//! fanout over SSE and web-push delivery.

pub mod app_state;
pub mod commands;
pub mod db;
pub mod fanout;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;

#[cfg(test)]
mod tracer_tests;
