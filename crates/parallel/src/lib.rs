//! # birdocc parallel
//!
//! Parallel-map strategy shared by the exhaustive submodel search and the
//! goodness-of-fit bootstrap. Work items are independent and results come
//! back in index order regardless of the mode.

pub mod strategy;

pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
