//! Integration tests for the persistence engine.
//!
//! These exercise the full coordinator lifecycle against the in-memory
//! reference backend: join/quit round trips, capacity reconciliation
//! with overflow, auto-save sweeps, the shutdown drain, and the
//! degradation paths (busy, corrupt, transient failure, migration).

mod support;
