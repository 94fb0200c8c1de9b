//! Shared primitive types used across the engine.

/// Index of one synthetic scenario within a run.
pub type ScenarioId = u64;

/// A stable identifier for a subject (sales rep, team, territory).
pub type SubjectId = String;

/// The seed a run was started with.
pub type Seed = u64;
