//! Core domain types and traits for the QID CI/CD engine.
//!
//! This crate contains:
//! - Pipeline, job, resource, resource type, runner and build definitions
//! - Canonical (slug) name validation
//! - The queue message envelope
//! - The `Service` trait the worker and transports consume
//! - Built-in runner and resource type

pub mod build;
pub mod builtin;
pub mod canonical;
pub mod error;
pub mod job;
pub mod message;
pub mod pipeline;
pub mod resource;
pub mod resource_type;
pub mod runner;
pub mod service;

pub use build::{Build, Status, Step};
pub use error::{Error, Result};
pub use job::{GetStep, Job, TaskStep};
pub use message::Body;
pub use pipeline::{Pipeline, Variable, VariableType};
pub use resource::{Resource, Version};
pub use resource_type::ResourceType;
pub use runner::{RunCommand, Runner, RunnerCommand};
pub use service::Service;
