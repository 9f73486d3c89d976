//! Foundation module - Core utilities and types
//!
//! - Logging setup
//! - Affine transform math
//! - Generational handle registry

pub mod handles;
pub mod logging;
pub mod math;
