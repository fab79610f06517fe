//! Core protocol and stage contracts for the pullstream library.
//!
//! This module contains the connection protocol (demand accounting, terminal
//! state, ports), the stage and logic traits, and the error type that every
//! other module builds on.

pub mod connection;
pub mod error;
pub mod traits;

// Re-export core items
pub use connection::{
    attach, connect, ConnectionState, Demand, Inlet, InletPort, Outlet, Termination,
};
pub use error::{Error, IntoError, Result};
pub use traits::{
    Flow, FlowExt, FlowRef, FlowSource, Sink, SinkLogic, SinkRef, Source, SourceExt, SourceLogic,
    SourceRef,
};
