//! The Spine schema as seen by the mapping.
//!
//! Every table the mapping knows about is an [`ItemType`]. The schema is
//! static: fields, defaults, unique keys and references are fixed per type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, SpineDbError};
use crate::value::Value;

/// A table of the Spine database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Alternative,
    Scenario,
    ScenarioAlternative,
    EntityClass,
    Entity,
    ParameterDefinition,
    ParameterValue,
}

impl ItemType {
    /// All item types, sorted so that every type comes after the types it references.
    pub const ALL: [ItemType; 7] = [
        ItemType::Alternative,
        ItemType::Scenario,
        ItemType::ScenarioAlternative,
        ItemType::EntityClass,
        ItemType::Entity,
        ItemType::ParameterDefinition,
        ItemType::ParameterValue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Alternative => "alternative",
            ItemType::Scenario => "scenario",
            ItemType::ScenarioAlternative => "scenario_alternative",
            ItemType::EntityClass => "entity_class",
            ItemType::Entity => "entity",
            ItemType::ParameterDefinition => "parameter_definition",
            ItemType::ParameterValue => "parameter_value",
        }
    }

    /// Content fields, i.e. every column except `id` and `commit_id`.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            ItemType::Alternative => &["name", "description"],
            ItemType::Scenario => &["name", "description", "active"],
            ItemType::ScenarioAlternative => &["scenario_id", "alternative_id", "rank"],
            ItemType::EntityClass => &["name", "description"],
            ItemType::Entity => &["class_id", "name", "description"],
            ItemType::ParameterDefinition => {
                &["entity_class_id", "name", "default_value", "description"]
            }
            ItemType::ParameterValue => &[
                "parameter_definition_id",
                "entity_id",
                "alternative_id",
                "value",
            ],
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            ItemType::Alternative | ItemType::Scenario | ItemType::EntityClass => &["name"],
            ItemType::ScenarioAlternative => &["scenario_id", "alternative_id", "rank"],
            ItemType::Entity => &["class_id", "name"],
            ItemType::ParameterDefinition => &["entity_class_id", "name"],
            ItemType::ParameterValue => &[
                "parameter_definition_id",
                "entity_id",
                "alternative_id",
                "value",
            ],
        }
    }

    /// Value used for an optional field the caller left out.
    pub fn default_value(self, field: &str) -> Value {
        match (self, field) {
            (_, "description") => Value::Text(String::new()),
            (ItemType::Scenario, "active") => Value::Boolean(false),
            _ => Value::Null,
        }
    }

    /// Groups of fields whose values identify an item uniquely within its table.
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            ItemType::Alternative | ItemType::Scenario | ItemType::EntityClass => &[&["name"]],
            ItemType::ScenarioAlternative => {
                &[&["scenario_id", "alternative_id"], &["scenario_id", "rank"]]
            }
            ItemType::Entity => &[&["class_id", "name"]],
            ItemType::ParameterDefinition => &[&["entity_class_id", "name"]],
            ItemType::ParameterValue => {
                &[&["parameter_definition_id", "entity_id", "alternative_id"]]
            }
        }
    }

    /// Fields that hold references to other items, with the referenced type.
    pub fn references(self) -> &'static [(&'static str, ItemType)] {
        match self {
            ItemType::Alternative | ItemType::Scenario | ItemType::EntityClass => &[],
            ItemType::ScenarioAlternative => &[
                ("scenario_id", ItemType::Scenario),
                ("alternative_id", ItemType::Alternative),
            ],
            ItemType::Entity => &[("class_id", ItemType::EntityClass)],
            ItemType::ParameterDefinition => &[("entity_class_id", ItemType::EntityClass)],
            ItemType::ParameterValue => &[
                ("parameter_definition_id", ItemType::ParameterDefinition),
                ("entity_id", ItemType::Entity),
                ("alternative_id", ItemType::Alternative),
            ],
        }
    }

    pub fn is_field(self, field: &str) -> bool {
        self.fields().contains(&field)
    }

    /// Types this type references directly.
    pub fn referenced_types(self) -> impl Iterator<Item = ItemType> {
        self.references().iter().map(|(_, item_type)| *item_type)
    }

    /// Types that reference this type directly.
    pub fn referrer_types(self) -> impl Iterator<Item = ItemType> {
        ItemType::ALL
            .into_iter()
            .filter(move |other| other.referenced_types().any(|t| t == self))
    }

    /// Position in [`ItemType::ALL`].
    pub fn rank(self) -> usize {
        ItemType::ALL
            .iter()
            .position(|t| *t == self)
            .unwrap_or(ItemType::ALL.len())
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = SpineDbError;

    fn from_str(s: &str) -> Result<Self> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SpineDbError::UnknownItemType(s.to_string()))
    }
}
