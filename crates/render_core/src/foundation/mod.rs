//! Foundation layer: math, rays and logging

pub mod logging;
pub mod math;
pub mod ray;
