//! Endpoint groups. Each module adds an `impl ApiClient` block.

pub mod academic;
pub mod attendance;
pub mod leaves;
pub mod teachers;
