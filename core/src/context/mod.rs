//! Context module for ferry
//!
//! This module provides the ambient execution context handed to runners.

pub mod execution_context;

pub use execution_context::*;
