pub mod adapters;
pub mod client;
pub mod mock;
pub mod registry;

pub use client::*;
pub use mock::*;
pub use registry::*;
