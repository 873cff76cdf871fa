/// Item ids, database ids and the map between them.
pub mod item_id;
/// The in-memory item and its lifecycle operations.
pub mod mapped_item;
/// Per-type arena of mapped items with its indexes.
pub mod mapped_table;
