// Integration test suite.
//
// HTTP surface tests go through rocket's local client; the fan-out
// scenarios drive hubs and dispatchers directly, sharing one in-memory
// bus to model a multi-instance deployment.

mod common;

mod fanout;
mod health;
mod metrics_endpoint;
mod upload;
