//! Serializable avatar settings for cross-process communication.
//!
//! An [`AvatarProfile`] captures the user's palette, an optional `viewBox`
//! override, and the raster settings in a format that can be serialized to
//! JSON and sent between frontend and backend processes.
//!
//! # Example
//!
//! ```
//! use avatar_composer::{AvatarProfile, RenderRequest};
//!
//! // Build a profile
//! let profile = AvatarProfile::new()
//!     .with_color("skin", "#f1c27d")
//!     .with_color("band", "#aa2222")
//!     .with_render(RenderRequest::square(256));
//!
//! // Serialize to JSON for sending to backend
//! let json = profile.to_json().unwrap();
//!
//! // Deserialize in backend
//! let restored = AvatarProfile::from_json(&json).unwrap();
//! assert_eq!(restored, profile);
//! ```

use serde::{Deserialize, Serialize};

use crate::accessory::StylePalette;
use crate::render::{RenderRequest, ViewBox};

// ============================================================================
// AvatarProfile
// ============================================================================

/// A serializable profile containing the avatar's customization settings.
///
/// # JSON Format
///
/// ```json
/// {
///   "palette": [
///     { "className": "skin", "fill": "#f1c27d" },
///     { "className": "band", "fill": "#aa2222" }
///   ],
///   "viewBox": "0 0 64 64",
///   "render": { "width": 256, "height": 256, "format": "png" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AvatarProfile {
    /// Fill colours for customizable classes, keyed by unprefixed class name.
    #[serde(default, skip_serializing_if = "StylePalette::is_empty")]
    pub palette: StylePalette,

    /// Overrides the `viewBox` taken from the accessories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "jsonschema", schemars(with = "Option<String>"))]
    pub view_box: Option<ViewBox>,

    /// Raster settings. `None` means no raster is produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderRequest>,
}

impl AvatarProfile {
    /// Creates an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the palette.
    pub fn with_palette(mut self, palette: StylePalette) -> Self {
        self.palette = palette;
        self
    }

    /// Sets the fill of one customizable class.
    pub fn with_color(mut self, class_name: impl Into<String>, fill: impl Into<String>) -> Self {
        self.palette.set(class_name, fill);
        self
    }

    pub fn with_view_box(mut self, view_box: ViewBox) -> Self {
        self.view_box = Some(view_box);
        self
    }

    pub fn with_render(mut self, request: RenderRequest) -> Self {
        self.render = Some(request);
        self
    }

    /// Serializes the profile to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes the profile to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserializes a profile from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RasterFormat;

    #[test]
    fn profile_serialization_roundtrip() {
        let profile = AvatarProfile::new()
            .with_color("skin", "#f1c27d")
            .with_view_box(ViewBox::new(0.0, 0.0, 64.0, 64.0))
            .with_render(RenderRequest::new(128, 64).with_format(RasterFormat::Jpeg));

        let json = profile.to_json().unwrap();
        let restored = AvatarProfile::from_json(&json).unwrap();

        assert_eq!(restored.palette.get("skin"), Some("#f1c27d"));
        assert_eq!(restored.view_box, Some(ViewBox::new(0.0, 0.0, 64.0, 64.0)));
        assert_eq!(restored.render.as_ref().unwrap().format, RasterFormat::Jpeg);
        assert_eq!(restored, profile);
    }

    #[test]
    fn profile_json_format() {
        let profile = AvatarProfile::new()
            .with_color("band", "red")
            .with_view_box(ViewBox::new(0.0, 0.0, 10.0, 10.0));

        let json = profile.to_json_pretty().unwrap();

        // camelCase, and the palette is a plain list
        assert!(json.contains("\"className\""));
        assert!(json.contains("\"viewBox\": \"0 0 10 10\""));
        assert!(!json.contains("\"render\""));
    }

    #[test]
    fn palette_keeps_insertion_order() {
        let json = r##"{"palette":[{"className":"b","fill":"#000"},{"className":"a","fill":"#fff"}]}"##;
        let profile = AvatarProfile::from_json(json).unwrap();

        let classes: Vec<_> = profile
            .palette
            .iter()
            .map(|entry| entry.class_name.as_str())
            .collect();
        assert_eq!(classes, vec!["b", "a"]);
    }

    #[test]
    fn invalid_view_box_is_rejected() {
        let json = r#"{"viewBox":"0 0 0 10"}"#;
        assert!(AvatarProfile::from_json(json).is_err());
    }

    #[test]
    fn empty_profile_deserializes() {
        let profile = AvatarProfile::from_json("{}").unwrap();

        assert!(profile.palette.is_empty());
        assert!(profile.view_box.is_none());
        assert!(profile.render.is_none());
    }
}
