// ============================================================================
// Eventpull Types - Core Data Types
// ============================================================================
//
// Data structures shared by the ingestion pipeline. NO dependencies on
// business logic, Redis, HTTP or the runtime.
//
// Contents:
// - CloudEvent payloads and received broker messages
// - Topic/subscription consumption targets and their credentials
// - Per-message ingestion outcomes and per-token settle results
//
// Dependencies:
// - serde (serialization only)
// - uuid (identifiers)
// - chrono (timestamps)
//
// ============================================================================

pub mod event;
pub mod outcome;
pub mod topic;

// Re-exports for convenience
pub use event::*;
pub use outcome::*;
pub use topic::*;
