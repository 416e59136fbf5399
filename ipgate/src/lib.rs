//! IP restriction gate: resolves client addresses against whitelist,
//! maintenance, blacklist and blocklogin rules and fronts a protected
//! service with the verdict.

pub mod config;
pub mod metrics;
pub mod obs;
pub mod restrict;
pub mod server;
pub mod telemetry;
pub mod upstream;
