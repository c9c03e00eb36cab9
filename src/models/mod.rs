//! Domain model module declarations.

pub mod agent;
pub mod plan;
pub mod session;
