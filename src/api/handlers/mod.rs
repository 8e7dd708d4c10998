//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Document and knowledge base handlers.
pub mod files;
/// Liveness handler.
pub mod health;
/// Job tracking and cancellation handlers.
pub mod jobs;
/// Research submission and report download handlers.
pub mod reports;
