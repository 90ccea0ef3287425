//! Test doubles for the broker and sensor seams.

pub mod mocks;
