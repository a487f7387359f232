#![cfg_attr(not(test), forbid(unsafe_code))]

//! Models and configuration shared by the Parley server and its clients.

pub mod config;
pub mod models;
