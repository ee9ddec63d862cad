//! Engine modules: the disk side of the planner.
//!
//! The engine turns a disk description and feature flags into sizes, a
//! role/device layout and an ordered list of storage operations, then drives
//! those operations through a [`PlanExecutor`](crate::executor::PlanExecutor).

pub mod autopart;
pub mod layout;
pub mod reconcile;
pub mod sizes;
pub mod storage;
