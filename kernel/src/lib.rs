// SCD2 Kernel
//
// Historized dimension tables: replay dated batches into a
// non-overlapping version history with exactly one current version
// per entity.

pub mod adapters;
pub mod audit;
pub mod batch;
pub mod config;
pub mod dimension;
pub mod invariants;
pub mod log;
pub mod pipeline;
pub mod replay;
