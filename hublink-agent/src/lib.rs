//! # hublink-agent — Hub Link Agent
//!
//! Foreground service that keeps a supervised connection to one hub,
//! logs every line the hub pushes and every health change, and can request
//! a hub-wide override once connected.

pub mod config;
pub mod service;
