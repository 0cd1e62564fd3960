//! Core module tests
//!
//! Tests for:
//! - Column resolution and aliases
//! - Chunked streaming statistics
//! - Spectral analysis
//! - Step-response characterization
//! - System identification
//! - Controller synthesis
//! - PID strings and CLI commands

pub mod cli_tests;
pub mod columns_tests;
pub mod identification_tests;
pub mod spectral_tests;
pub mod step_response_tests;
pub mod stream_tests;
pub mod synthesis_tests;
