//! Integration test suite for gaffer.
//!
//! These tests drive the orchestrator through whole runs: sequential and
//! parallel batches, merge gates, epic grouping, and resuming interrupted
//! work. They verify that the pipeline, orchestrator, and report layers
//! compose correctly.
//!
//! # Test Categories
//!
//! - `runs`: batch execution, ordering, and merge gate behavior
//! - `epics`: grouped execution, skip propagation, already-merged detection
//! - `resume`: checkpointed state across consecutive runs
//!
//! # CI Compatibility
//!
//! Agents, the forge, and the tracker are all scripted fakes; no subprocess
//! is spawned and no network call is made, so the suite is safe in CI.

mod fixtures;

mod epics;
mod resume;
mod runs;
