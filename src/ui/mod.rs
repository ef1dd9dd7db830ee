//! Presentation payload: flattens a repair outcome into the steps, problems
//! and graph a front end renders.

pub mod payload;

pub use payload::{GraphEdge, GraphNode, LoadStatus, NodeStatus, Problem, Step, UiPayload, build_payload};
