/// This module contains the state transitions that apply resolved conflicts.
pub mod actions;
/// This module contains logic for detecting conflicts between mapped items and database rows.
pub mod detection;
/// This module contains the conflict model and the resolution policies.
pub mod resolution;
