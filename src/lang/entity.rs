//! `the <field> [of <entity> <id>]` references.
//!
//! Both halves are encoded as plain operand words after the entity opcodes,
//! so the discriminants below are part of the bytecode format.

use serde::{Deserialize, Serialize};

use crate::lang::value::Value;

/// Owner of a `the` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TheEntity {
    /// Movie-wide properties with no id: `the frame`, `the mouseH`.
    Movie = 0,
    Sprite = 1,
    Cast = 2,
    Field = 3,
    Window = 4,
    MenuItem = 5,
}

impl TheEntity {
    pub const ALL: [TheEntity; 6] = [
        TheEntity::Movie,
        TheEntity::Sprite,
        TheEntity::Cast,
        TheEntity::Field,
        TheEntity::Window,
        TheEntity::MenuItem,
    ];

    /// Entity named after `of`. `member` is an alias of `cast`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "sprite" => TheEntity::Sprite,
            "cast" | "member" => TheEntity::Cast,
            "field" => TheEntity::Field,
            "window" => TheEntity::Window,
            "menuitem" => TheEntity::MenuItem,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TheEntity::Movie => "movie",
            TheEntity::Sprite => "sprite",
            TheEntity::Cast => "cast",
            TheEntity::Field => "field",
            TheEntity::Window => "window",
            TheEntity::MenuItem => "menuItem",
        }
    }

    pub fn from_word(word: u32) -> Option<Self> {
        Self::ALL.get(word as usize).copied()
    }
}

macro_rules! the_fields {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Property selected by a `the` reference.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum TheField {
            $($variant,)*
        }

        impl TheField {
            pub const ALL: &'static [TheField] = &[$(TheField::$variant,)*];

            pub fn from_name(name: &str) -> Option<Self> {
                let lowered = name.to_ascii_lowercase();
                $(if lowered == $name.to_ascii_lowercase() {
                    return Some(TheField::$variant);
                })*
                None
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(TheField::$variant => $name,)*
                }
            }
        }
    };
}

the_fields! {
    // movie
    Frame => "frame",
    Movie => "movie",
    MouseH => "mouseH",
    MouseV => "mouseV",
    MouseDown => "mouseDown",
    Key => "key",
    KeyCode => "keyCode",
    Ticks => "ticks",
    Timer => "timer",
    ClickOn => "clickOn",
    LastClick => "lastClick",
    StageColor => "stageColor",
    FloatPrecision => "floatPrecision",
    // sprite
    LocH => "locH",
    LocV => "locV",
    Left => "left",
    Top => "top",
    Right => "right",
    Bottom => "bottom",
    Width => "width",
    Height => "height",
    CastNum => "castNum",
    Visible => "visible",
    Ink => "ink",
    Blend => "blend",
    ForeColor => "foreColor",
    BackColor => "backColor",
    Puppet => "puppet",
    // cast, field, window
    Name => "name",
    Number => "number",
    Text => "text",
    TextFont => "textFont",
    TextSize => "textSize",
    Title => "title",
    // menu items
    Checkmark => "checkMark",
    Enabled => "enabled",
}

impl TheField {
    pub fn from_word(word: u32) -> Option<Self> {
        Self::ALL.get(word as usize).copied()
    }
}

/// Fully evaluated `the` reference handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRef {
    pub entity: TheEntity,
    pub field: TheField,
    pub id: Option<Value>,
    pub menu: Option<Value>,
}

impl EntityRef {
    pub fn movie(field: TheField) -> Self {
        EntityRef {
            entity: TheEntity::Movie,
            field,
            id: None,
            menu: None,
        }
    }

    pub fn with_id(entity: TheEntity, field: TheField, id: Value) -> Self {
        EntityRef {
            entity,
            field,
            id: Some(id),
            menu: None,
        }
    }

    pub fn menu_item(field: TheField, item: Value, menu: Value) -> Self {
        EntityRef {
            entity: TheEntity::MenuItem,
            field,
            id: Some(item),
            menu: Some(menu),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "the {}", self.field.name())?;
        match (&self.id, &self.menu) {
            (Some(item), Some(menu)) => write!(f, " of menuItem {} of menu {}", item, menu),
            (Some(id), None) => write!(f, " of {} {}", self.entity.name(), id),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_names_are_case_insensitive() {
        assert_eq!(TheEntity::from_name("Sprite"), Some(TheEntity::Sprite));
        assert_eq!(TheEntity::from_name("member"), Some(TheEntity::Cast));
        assert_eq!(TheEntity::from_name("menuItem"), Some(TheEntity::MenuItem));
        assert_eq!(TheEntity::from_name("score"), None);
    }

    #[test]
    fn test_field_words_match_discriminants() {
        for field in TheField::ALL {
            assert_eq!(TheField::from_word(*field as u32), Some(*field));
        }
        for entity in TheEntity::ALL {
            assert_eq!(TheEntity::from_word(entity as u32), Some(entity));
        }
        assert_eq!(TheField::from_word(10_000), None);
    }

    #[test]
    fn test_field_lookup() {
        assert_eq!(TheField::from_name("MOUSEH"), Some(TheField::MouseH));
        assert_eq!(TheField::from_name("locv"), Some(TheField::LocV));
        assert_eq!(TheField::from_name("colour"), None);
        assert_eq!(TheField::CastNum.name(), "castNum");
    }

    #[test]
    fn test_display() {
        let r = EntityRef::with_id(TheEntity::Sprite, TheField::LocH, Value::Int(3));
        assert_eq!(r.to_string(), "the locH of sprite 3");
        let r = EntityRef::menu_item(TheField::Checkmark, Value::Int(1), Value::Int(2));
        assert_eq!(r.to_string(), "the checkMark of menuItem 1 of menu 2");
        assert_eq!(EntityRef::movie(TheField::Frame).to_string(), "the frame");
    }
}
