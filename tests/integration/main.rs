//! Engine integration tests against the in-memory task store.

mod engine_test;
mod helpers;
mod trigger_test;
