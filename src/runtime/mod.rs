// src/runtime/mod.rs

//! The compatibility runtime: which installation to use and how every
//! child process must be environed to run against it.
//!
//! - [`resolver`] picks the first usable installation from an ordered
//!   candidate list and describes it as an immutable [`RuntimeDescriptor`].
//! - [`environment`] derives the [`ProcessEnvironment`] for a descriptor and
//!   a prefix. It is a pure function; nothing here spawns processes.

pub mod environment;
pub mod resolver;

pub use environment::{build_environment, host_env, prefix_identity, HostEnv, ProcessEnvironment};
pub use resolver::{default_candidates, resolve, RuntimeCandidate, RuntimeDescriptor};
