//! # Declarative
//!
//! Declarative resource graphs: declare the infrastructure you want, wire
//! resources together through deferred outputs, and let the engine converge
//! the stored state to match.
//!
//! ## Core Concepts
//!
//! - **Stack**: a named set of resources, components and exported outputs
//! - **Resource**: a leaf node provisioned by a [`Provider`]
//! - **Component**: a grouping node; its id prefixes its children's ids and
//!   its explicit dependencies are inherited by them
//! - **Output**: a value known only after its producer completes. Feeding an
//!   output into another resource's inputs creates an implicit dependency
//! - **StateStore**: what was provisioned last time; the engine diffs
//!   against it to choose create, update, replace, delete or nothing
//! - **Engine**: walks the dependency graph on a bounded worker pool
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Engine, MemoryStateStore, NoProgress, RunOptions, Stack};
//!
//! let mut stack = Stack::new("dev")?;
//! let network = stack.component("network", "network").declare()?;
//! let vpc = network
//!     .resource(&mut stack, "vpc", "vpc")
//!     .input("cidr_block", "172.32.0.0/16")
//!     .declare()?;
//! let subnet = network
//!     .resource(&mut stack, "subnet", "subnet")
//!     .input("vpc_id", vpc.output("id"))
//!     .declare()?;
//! stack.export("subnet_id", &subnet.output("id"));
//!
//! let mut store = MemoryStateStore::new("dev");
//! let engine = Engine::new(&provider, RunOptions::default());
//! let report = engine.run(&stack, &mut store, &mut NoProgress)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The engine is decoupled from anything it talks to:
//!
//! - [`Provider`]: creates, updates and deletes resources
//! - [`StateStore`]: persists what was provisioned
//! - [`ProgressCallback`]: receives progress updates

pub mod component;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod output;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod stack;
pub mod state;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use component::{Component, ComponentBuilder};
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use diff::{Decision, changed_properties, fingerprint};
pub use error::{
    DefinitionError, EngineError, OutputError, ProviderError, Result, StateError,
};
pub use executor::Engine;
pub use graph::{DependencyGraph, EdgeKind};
pub use output::Output;
pub use planner::{Plan, PlanStep, preview, stack_outputs, teardown_order};
pub use provider::{
    CreateRequest, Created, DeleteRequest, PropertyClass, PropertyTable, Provider, UpdateRequest,
};
pub use resource::{Dependency, ResourceBuilder, ResourceRef};
pub use retry::{RetryPolicy, with_retry};
pub use stack::Stack;
pub use state::{
    FileStateStore, InFlight, MemoryStateStore, PendingDelete, StackState, StateEntry, StateStore,
};
pub use types::{
    AbortReason, ExportValue, NodeId, NodeReport, NodeStatus, Operation, Properties, RunOptions,
    RunOutcome, RunReport, RunSummary, SkipReason,
};
pub use value::{Input, UNKNOWN};
