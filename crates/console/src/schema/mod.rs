mod graph;
mod loader;

pub use graph::{build as build_graph, GraphDirection, GraphStyle};
pub use loader::SchemaLoader;
