//! Error taxonomy for composition and rendering.

use thiserror::Error;

/// Errors produced while namespacing, composing, or rasterising an avatar.
///
/// Every variant is `Clone` so that a reactive cell can hand the same
/// settled error to any number of readers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvatarError {
    /// A selector or stylesheet is not syntactically valid CSS.
    #[error("invalid CSS: {css:?}")]
    Parse { css: String },

    /// An accessory's markup is not well-formed XML.
    #[error("accessory '{accessory_id}' has malformed SVG: {message}")]
    SvgParse {
        accessory_id: String,
        message: String,
    },

    /// A customizable class has no colour in the palette.
    #[error("accessory '{accessory_id}' declares customizable class '{class_name}' with no palette entry")]
    MissingPaletteEntry {
        accessory_id: String,
        class_name: String,
    },

    /// Two accessories resolved to the same namespace id in one composition.
    #[error("duplicate accessory namespace '{namespace}'")]
    DuplicateNamespace { namespace: String },

    /// The document's `viewBox` is missing or malformed.
    #[error("missing or invalid viewBox: {value:?}")]
    ViewBox { value: Option<String> },

    /// Drawing or encoding the raster failed.
    #[error("raster draw failed: {0}")]
    HostDraw(String),
}

impl AvatarError {
    pub(crate) fn parse(css: &str) -> Self {
        Self::Parse {
            css: css.to_string(),
        }
    }
}
