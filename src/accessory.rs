//! Accessory fragments, palettes, and per-accessory preparation.
//!
//! An accessory is one independently authored SVG layer (a hat, a pair of
//! glasses, a face) carrying its own `<style>` block. [`prepare`] isolates an
//! accessory so that it can be merged with others: its stylesheet is pulled
//! out of the markup, every class it styles is prefixed with a namespace
//! derived from the accessory, and the user's palette colours are appended
//! as overriding rules for the classes the author marked customizable.

use std::collections::BTreeSet;

use cssparser::serialize_identifier;
use serde::{Deserialize, Serialize};

use crate::document::Element;
use crate::error::AvatarError;
use crate::namespace::{namespace_stylesheet, prefix_class_attribute};

// ============================================================================
// AccessoryFragment
// ============================================================================

/// One accessory as delivered by the data layer.
///
/// # JSON Format
///
/// ```json
/// {
///   "id": "top-hat",
///   "slot": 30,
///   "customizableClasses": ["band"],
///   "svg": "<svg xmlns=\"http://www.w3.org/2000/svg\">...</svg>"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessoryFragment {
    pub id: String,

    /// Stacking position; lower slots are drawn first.
    pub slot: i32,

    /// Classes whose fill comes from the user's palette.
    #[serde(default)]
    pub customizable_classes: Vec<String>,

    /// Raw SVG markup.
    pub svg: String,
}

impl AccessoryFragment {
    pub fn new(id: impl Into<String>, slot: i32, svg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot,
            customizable_classes: Vec::new(),
            svg: svg.into(),
        }
    }

    /// Marks classes as palette-driven.
    pub fn with_customizable<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.customizable_classes
            .extend(classes.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// StylePalette
// ============================================================================

/// A single class-to-colour override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PaletteEntry {
    pub class_name: String,

    /// Any CSS colour value; passed through verbatim.
    pub fill: String,
}

/// Ordered set of class-to-colour overrides shared by all accessories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(transparent)]
pub struct StylePalette {
    entries: Vec<PaletteEntry>,
}

impl StylePalette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, class_name: impl Into<String>, fill: impl Into<String>) -> Self {
        self.set(class_name, fill);
        self
    }

    /// Sets the colour for a class, keeping its original position if it was
    /// already present.
    pub fn set(&mut self, class_name: impl Into<String>, fill: impl Into<String>) {
        let class_name = class_name.into();
        let fill = fill.into();
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.class_name == class_name)
        {
            Some(entry) => entry.fill = fill,
            None => self.entries.push(PaletteEntry { class_name, fill }),
        }
    }

    /// Returns the colour for an unprefixed class name.
    pub fn get(&self, class_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.class_name == class_name)
            .map(|entry| entry.fill.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaletteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StylePalette {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut palette = Self::new();
        for (class_name, fill) in iter {
            palette.set(class_name, fill);
        }
        palette
    }
}

// ============================================================================
// Preparation
// ============================================================================

/// An accessory ready to be grafted into a composed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAccessory {
    /// Identifier-safe namespace; also the id of the accessory's group.
    pub namespace: String,

    /// The accessory's root `<svg>` with styles removed and classes prefixed.
    pub root: Element,

    /// Namespaced rules followed by palette overrides.
    pub stylesheet: String,
}

/// Isolates one accessory for composition.
///
/// `index` is the accessory's position in the caller's list and is only used
/// to build a fallback namespace when the id is not a valid identifier.
///
/// # Errors
///
/// - [`AvatarError::SvgParse`] if the markup is not well-formed XML
/// - [`AvatarError::Parse`] if an embedded stylesheet is not valid CSS
/// - [`AvatarError::MissingPaletteEntry`] if a customizable class has no colour
pub fn prepare(
    accessory: &AccessoryFragment,
    index: usize,
    palette: &StylePalette,
) -> Result<PreparedAccessory, AvatarError> {
    let mut root = Element::parse(&accessory.svg).map_err(|err| AvatarError::SvgParse {
        accessory_id: accessory.id.clone(),
        message: err.to_string(),
    })?;

    let namespace = namespace_id(&accessory.id, index);
    let prefix = format!("{namespace}-");

    let extracted = root
        .take_descendants("style")
        .iter()
        .map(Element::text_content)
        .collect::<Vec<_>>()
        .join("\n");
    let namespaced = namespace_stylesheet(&extracted, &prefix)?;

    let mut known: BTreeSet<String> = namespaced.classes;
    known.extend(accessory.customizable_classes.iter().cloned());
    root.visit_mut(&mut |element| {
        if let Some(class) = element.attribute("class") {
            let prefixed = prefix_class_attribute(class, &known, &prefix);
            element.set_attribute("class", prefixed);
        }
    });

    let mut stylesheet = namespaced.css;
    for class_name in &accessory.customizable_classes {
        let fill = palette
            .get(class_name)
            .ok_or_else(|| AvatarError::MissingPaletteEntry {
                accessory_id: accessory.id.clone(),
                class_name: class_name.clone(),
            })?;
        if !stylesheet.is_empty() && !stylesheet.ends_with('\n') {
            stylesheet.push('\n');
        }
        stylesheet.push('.');
        // Escaped the same way as the rewritten selectors.
        let _ = serialize_identifier(&format!("{prefix}{class_name}"), &mut stylesheet);
        stylesheet.push_str(&format!("{{fill:{fill}}}"));
    }

    log::debug!(
        "prepared accessory '{}' as '{}' ({} classes)",
        accessory.id,
        namespace,
        known.len()
    );

    Ok(PreparedAccessory {
        namespace,
        root,
        stylesheet,
    })
}

/// The accessory id if usable as both a CSS identifier and an XML id,
/// otherwise `accessory{index}`.
pub fn namespace_id(id: &str, index: usize) -> String {
    if is_identifier_safe(id) {
        id.to_string()
    } else {
        format!("accessory{index}")
    }
}

fn is_identifier_safe(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

// ============================================================================
// Tests
// ============================================================================
