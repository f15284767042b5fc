//! Runtime pieces of the `natsbee` binary around the bridge.

pub mod output;
pub mod signals;
