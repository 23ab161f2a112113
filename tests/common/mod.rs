pub mod cluster;
pub mod executors;

pub use cluster::*;
pub use executors::*;
