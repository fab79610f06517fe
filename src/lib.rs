//! # Pull-based reactive streams for Rust
//!
//! This crate provides a back-pressured stream engine: sources, flows and
//! sinks are composed into a pipeline in which the consumer controls the rate
//! of delivery by explicitly requesting elements.
//!
//! ## Core Concepts
//!
//! - **Source**: Emits elements, never more than the sink requested
//! - **Sink**: Consumes elements and requests more when it is ready
//! - **Flow**: Transforms elements between a source and a sink
//! - **Connection**: The demand accounting between one source and one sink
//! - **Scheduler**: Decouples the call stack of a producer from its consumer
//! - **Pipeline**: One source bound to one sink, started on a scheduler
//!
//! Stages are stateless blueprints. Starting a pipeline creates a fresh logic
//! instance per stage, so the same pipeline can be started many times.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use pullstream::prelude::*;
//! use pullstream::{flows, sources};
//!
//! fn main() -> Result<()> {
//!     let collect = CollectSink::new();
//!     let scheduler: SchedulerRef = Rc::new(TrampolineScheduler::new());
//!
//!     sources::count(1, 6)
//!         .via(flows::map(|x: i64| x * 2))
//!         .to(collect.as_sink())
//!         .start(&scheduler)?;
//!
//!     assert_eq!(collect.items(), vec![2, 4, 6, 8, 10]);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod flows;
pub mod pipeline;
pub mod scheduler;
pub mod sinks;
pub mod sources;

// Re-export commonly used items
pub mod prelude {
    pub use crate::core::{
        Error, Flow, FlowExt, FlowRef, Inlet, Outlet, Result, Sink, SinkLogic, SinkRef, Source,
        SourceExt, SourceLogic, SourceRef,
    };
    pub use crate::pipeline::Pipeline;
    pub use crate::scheduler::{
        ImmediateScheduler, LocalScheduler, Scheduler, SchedulerRef, TrampolineScheduler, Worker,
    };
    pub use crate::sinks::{CollectSink, DemandConfig};
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
