//! Shared utilities used across the compiler and the runtime

pub mod env_loader;
pub mod ulid_generator;

pub use env_loader::EnvLoader;
pub use ulid_generator::generate_monotonic_ulid;
