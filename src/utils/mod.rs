//! Utility functions shared by the upload engine.

/// SHA-256 helpers for payload hashing
pub mod hash;
