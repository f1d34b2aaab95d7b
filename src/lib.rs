//! Teadal policy-bundle compiler.
//!
//! Turns access-control annotations in OpenAPI v3 descriptions
//! (`x-teadal-policies`, `x-teadal-IAM-provider`) into per-service Rego
//! modules, maintains them as a multi-service OPA bundle, and persists the
//! bundle to a local file or an S3-compatible object store. The library is
//! exposed for the binary and for integration tests.

pub mod bundle;
pub mod errors;
pub mod policy;
pub mod repository;
pub mod settings;
pub mod web;
