//! End-to-end test support for mnemo
//!
//! - `harness`: isolated engines over temporary databases
//! - `mocks`: deterministic collaborators and realistic fixture data

pub mod harness;
pub mod mocks;
