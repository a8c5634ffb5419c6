//! avatar-composer: layered avatar composition and rendering
//!
//! This crate merges independently authored SVG accessories (a face, a hat, a
//! shirt, ...) into one SVG document, recolours them from a user palette, and
//! rasterises the result. Each accessory's class names are namespaced so that
//! identically named classes in different accessories never collide.
//!
//! # Example
//!
//! ```
//! use avatar_composer::{AccessoryFragment, Avatar, RenderRequest, StylePalette, compose, render};
//!
//! let hat = AccessoryFragment::new(
//!     "hat",
//!     20,
//!     r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16">
//!          <style>.main { stroke: black }</style>
//!          <rect class="main" width="16" height="4"/>
//!        </svg>"#,
//! )
//! .with_customizable(["main"]);
//! let shirt = AccessoryFragment::new(
//!     "shirt",
//!     10,
//!     r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16">
//!          <rect class="main" y="10" width="16" height="6" fill="blue"/>
//!        </svg>"#,
//! );
//!
//! let palette = StylePalette::new().with("main", "#aa2222");
//! let document = compose(&Avatar::new(vec![hat, shirt]), &palette).unwrap();
//!
//! // Lower slots are drawn first; classes are prefixed per accessory.
//! assert_eq!(document.namespaces(), vec!["shirt", "hat"]);
//! assert_eq!(document.class_attributes(), vec!["main", "hat-main"]);
//!
//! let raster = render(&document, &RenderRequest::square(64)).unwrap();
//! assert_eq!(raster.mime_type, "image/png");
//! ```
//!
//! # Live Sessions
//!
//! [`AvatarSession`] keeps the composed document and its raster up to date as
//! the inputs change, using the [`reactive`] cells and the [`serializer`]:
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use avatar_composer::{AvatarProfile, AvatarSession, Configurable, RenderRequest};
//!
//! let mut session = AvatarSession::new();
//! session.apply_profile(&AvatarProfile::new().with_render(RenderRequest::square(32)));
//!
//! // Export current settings
//! let json = session.export_profile().to_json().unwrap();
//! assert!(json.contains("\"render\""));
//! # }
//! ```

mod accessory;
mod composer;
mod document;
mod error;
mod profile;
mod render;
mod session;

pub mod namespace;
pub mod reactive;
pub mod serializer;

pub use accessory::{AccessoryFragment, PaletteEntry, PreparedAccessory, StylePalette, prepare};
pub use composer::{AVATAR_GROUP_ID, Avatar, ComposedDocument, compose};
pub use document::{Attribute, Element, NamespaceDecl, Node, SVG_NS};
pub use error::AvatarError;
pub use profile::AvatarProfile;
pub use render::{RasterFormat, RasterResult, RenderRequest, ViewBox, render};
pub use session::{AvatarSession, Configurable};
