//! Common test utilities and infrastructure
//!
//! Shared fixtures, fakes and helpers used across the wall test suites.

#![allow(dead_code)]

pub mod fakes;
pub mod fixtures;
pub mod helpers;

pub use fakes::{Behaviour, RecordingLauncher, TableInspector};
pub use fixtures::TestFixtures;
pub use helpers::{TestHelpers, WallBuilder};
