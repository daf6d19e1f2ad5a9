//! Octilinear schematic layout engine for transit line networks.
//!
//! Takes a line graph with geographic geometry and embeds it onto a
//! discrete grid whose edges run only in the eight compass directions,
//! ready for rendering as a schematic transit map. The heuristic driver
//! lives in [`octilinearizer`], the exact formulation in [`ilp`].

pub mod base_graph;
pub mod comb_graph;
pub mod drawing;
pub mod error;
pub mod export;
pub mod geometry;
pub mod ilp;
pub mod line_graph;
pub mod octilinearizer;
pub mod search;

pub use base_graph::{BaseGraph, BaseGraphKind, Penalties};
pub use drawing::{Drawing, FullScore};
pub use error::LayoutError;
pub use line_graph::LineGraph;
pub use octilinearizer::{LayoutConfig, LayoutResult, Octilinearizer};

#[cfg(test)]
mod octilinearizer_test;
