//! Capability registry for the Taskweave orchestration engine.
//!
//! Agents are opaque workers that advertise one or more capabilities. The
//! scheduler looks them up by capability name and invokes them through the
//! single-method [`Agent`] contract; it never knows what an agent computes.
//!
//! # Main types
//!
//! - [`Agent`]: The polymorphic invocation contract.
//! - [`AgentHandle`]: Cloneable handle that tracks in-flight load.
//! - [`CapabilityRegistry`]: Lookup interface consumed by the scheduler.
//! - [`AgentRegistry`]: Thread-safe in-memory registry with liveness toggling.
//! - [`select_agent`]: Deterministic tie-break among matching agents.

/// Agent contract, descriptors and handles.
pub mod agent;
/// Registry trait and in-memory implementation.
pub mod registry;

pub use agent::{Agent, AgentDescriptor, AgentError, AgentHandle, AgentInputs};
pub use registry::{select_agent, AgentRegistry, CapabilityRegistry};
