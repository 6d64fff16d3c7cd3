//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into management-level APIs.
//! - Keep callers decoupled from storage details.

pub mod subscription_service;
