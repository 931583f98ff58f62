//! Core data types for the Quorix consensus core

pub mod decision;
pub mod offer;
pub mod report;
