//! graph-viser - force-directed graph layout and hierarchical graph simplification.
//!
//! The engine works on plain data: a [`model::Graph`] goes in, positions,
//! cluster labels, hierarchy levels and visibility state come out. Rendering
//! is left to whoever consumes those.

pub mod config;
pub mod dbscan;
pub mod error;
pub mod hierarchy;
pub mod interaction;
pub mod io;
pub mod layout;
pub mod louvain;
pub mod model;
