//! Demonstration driver for the Horizon RPC bridge.
//!
//! Opens one channel to the demo backend, runs a fixed sequence of calls and
//! renders every outcome into an HTML document:
//!
//! 1. `grpc.channelz.v1.Channelz/GetServers`
//! 2. `web.Backend/GetUser` for a known id
//! 3. `web.Backend/GetUser` for an unknown id
//! 4. `web.Backend/GetUsers`, streamed
//! 5. `finished`

pub mod config;
pub mod driver;
mod error;
pub mod proto;

pub use config::DemoConfig;
pub use driver::{Driver, FINISHED, RunSummary};
pub use error::{DemoError, Result};
