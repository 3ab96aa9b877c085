//! Infrastructure layer: event stores, repositories, projections, relay
//! workers and configuration.

pub mod config;
pub mod event_store;
pub mod notifications;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod services;
pub mod workers;
