//! Merges prepared accessories into one SVG document.
//!
//! # Document Layout
//!
//! ```text
//! <svg xmlns="http://www.w3.org/2000/svg" viewBox="...">
//!   <style> rules of every accessory, in render order </style>
//!   <g id="avatar">
//!     <g id="{namespace of lowest slot}"> ... </g>
//!     <g id="{namespace of next slot}"> ... </g>
//!   </g>
//! </svg>
//! ```
//!
//! Groups are keyed by namespace so downstream code can address a single
//! accessory with selectors such as `#avatar #hat .hat-band`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::accessory::{AccessoryFragment, StylePalette, prepare};
use crate::document::{Element, NamespaceDecl, Node, SVG_NS};
use crate::error::AvatarError;
use crate::render::ViewBox;

/// Id of the group wrapping every accessory.
pub const AVATAR_GROUP_ID: &str = "avatar";

/// Root attributes that size an accessory's own canvas and are not carried
/// over to its group.
const VIEWPORT_ATTRIBUTES: &[&str] = &[
    "viewBox",
    "width",
    "height",
    "x",
    "y",
    "id",
    "preserveAspectRatio",
    "version",
    "baseProfile",
];

// ============================================================================
// Avatar
// ============================================================================

/// The accessories making up one avatar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub accessories: Vec<AccessoryFragment>,

    /// Overrides the `viewBox` otherwise taken from the accessories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_box: Option<ViewBox>,
}

impl Avatar {
    pub fn new(accessories: Vec<AccessoryFragment>) -> Self {
        Self {
            accessories,
            view_box: None,
        }
    }

    pub fn with_view_box(mut self, view_box: ViewBox) -> Self {
        self.view_box = Some(view_box);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// ComposedDocument
// ============================================================================

/// A single SVG document holding every accessory of an avatar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    root: Element,
}

impl ComposedDocument {
    /// Re-reads a document previously produced by [`to_xml`](Self::to_xml).
    pub fn parse(xml: &str) -> Result<Self, AvatarError> {
        let root = Element::parse(xml).map_err(|err| AvatarError::SvgParse {
            accessory_id: AVATAR_GROUP_ID.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self { root })
    }

    /// The root `<svg>` element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Serializes the document for vector export.
    pub fn to_xml(&self) -> String {
        self.root.to_xml()
    }

    /// The raw `viewBox` attribute of the root, if any.
    pub fn view_box(&self) -> Option<&str> {
        self.root.attribute("viewBox")
    }

    /// Text of the merged `<style>` block.
    pub fn stylesheet(&self) -> String {
        self.root
            .child_elements()
            .find(|element| element.local_name() == "style")
            .map(Element::text_content)
            .unwrap_or_default()
    }

    /// The accessory groups in render order.
    pub fn groups(&self) -> impl Iterator<Item = &Element> {
        self.root
            .child_elements()
            .filter(|element| element.attribute("id") == Some(AVATAR_GROUP_ID))
            .flat_map(Element::child_elements)
    }

    /// Namespace ids of the accessory groups, in render order.
    pub fn namespaces(&self) -> Vec<&str> {
        self.groups()
            .filter_map(|group| group.attribute("id"))
            .collect()
    }

    /// Every `class` attribute value in document order.
    pub fn class_attributes(&self) -> Vec<String> {
        let mut classes = Vec::new();
        self.root.visit(&mut |element| {
            if let Some(class) = element.attribute("class") {
                classes.push(class.to_string());
            }
        });
        classes
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Composes an avatar with the given palette.
///
/// Accessories are drawn in ascending slot order; ties keep their original
/// order. The first preparation error aborts the whole composition.
pub fn compose(avatar: &Avatar, palette: &StylePalette) -> Result<ComposedDocument, AvatarError> {
    let mut order: Vec<(usize, &AccessoryFragment)> = avatar.accessories.iter().enumerate().collect();
    // `sort_by_key` is stable.
    order.sort_by_key(|(_, accessory)| accessory.slot);

    let mut root = Element::new("svg");
    root.declare_namespace(NamespaceDecl {
        prefix: None,
        uri: SVG_NS.to_string(),
    });

    let mut view_box = avatar.view_box.map(|view_box| view_box.to_string());
    let mut seen = HashSet::new();
    let mut stylesheet = String::new();
    let mut avatar_group = Element::new("g").with_attribute("id", AVATAR_GROUP_ID);

    for (index, accessory) in order {
        let prepared = prepare(accessory, index, palette)?;
        if !seen.insert(prepared.namespace.clone()) {
            return Err(AvatarError::DuplicateNamespace {
                namespace: prepared.namespace,
            });
        }

        if view_box.is_none() {
            view_box = prepared.root.attribute("viewBox").map(str::to_string);
        }
        let mut group = Element::new("g").with_attribute("id", prepared.namespace.as_str());
        for decl in prepared.root.namespaces {
            let conflicts = root
                .namespaces
                .iter()
                .any(|ns| ns.prefix == decl.prefix && ns.uri != decl.uri);
            if conflicts {
                // Keep the accessory's own binding for its subtree.
                group.namespaces.push(decl);
            } else {
                root.declare_namespace(decl);
            }
        }
        for attr in prepared.root.attributes {
            if !VIEWPORT_ATTRIBUTES.contains(&attr.name.as_str()) {
                group.set_attribute(&attr.name, attr.value);
            }
        }

        if !prepared.stylesheet.is_empty() {
            if !stylesheet.is_empty() {
                stylesheet.push('\n');
            }
            stylesheet.push_str(&prepared.stylesheet);
        }

        group.children = prepared.root.children;
        avatar_group.children.push(Node::Element(group));

        log::debug!(
            "composed accessory '{}' (slot {}) as #{}",
            accessory.id,
            accessory.slot,
            prepared.namespace
        );
    }

    if let Some(view_box) = view_box {
        root.set_attribute("viewBox", view_box);
    }

    log::trace!("composed stylesheet is {} bytes", stylesheet.len());
    let mut style = Element::new("style");
    style.children.push(Node::Text(stylesheet));
    root.children.push(Node::Element(style));
    root.children.push(Node::Element(avatar_group));
    root.strip_insignificant();

    Ok(ComposedDocument { root })
}

// ============================================================================
// Tests
// ============================================================================
