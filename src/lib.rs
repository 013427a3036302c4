//! APCS Prep - Subscription backend for an AP Computer Science exam-prep platform
//!
//! This crate implements the subscription lifecycle (trials, paid plans,
//! cancellation, provider webhook reconciliation) behind a REST API.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
