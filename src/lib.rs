// Strava Sync - Library root for testing

pub mod activities;
pub mod auth;
pub mod config;
pub mod error;
