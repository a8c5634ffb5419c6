//! Reactive avatar pipeline.
//!
//! An [`AvatarSession`] holds the user's current choices as [`Source`]s and
//! derives two [`ReactiveCell`]s from them:
//!
//! 1. **Document** (`document`): recomposed whenever the accessories, the
//!    `viewBox` override, or the palette change
//! 2. **Raster** (`raster`): redrawn whenever the document or the render
//!    request changes
//!
//! Drawing runs on Tokio's blocking pool and goes through an
//! [`ExecutionSerializer`], so only one raster is drawn at a time even when
//! several sessions share the same serializer. Finished rasters are cached
//! per render request until the document changes.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::accessory::{AccessoryFragment, StylePalette};
use crate::composer::{Avatar, ComposedDocument, compose};
use crate::error::AvatarError;
use crate::profile::AvatarProfile;
use crate::reactive::{Interrupt, ReactiveCell, Source, Supersession};
use crate::render::{RasterResult, RenderRequest, ViewBox, render};
use crate::serializer::{ExecutionSerializer, SerializedSlot};

// ============================================================================
// Configurable Trait
// ============================================================================

/// Trait for types that can be configured from an [`AvatarProfile`].
pub trait Configurable {
    /// Applies a profile's settings to this instance.
    fn apply_profile(&mut self, profile: &AvatarProfile);

    /// Exports the current settings as a profile.
    fn export_profile(&self) -> AvatarProfile;
}

// ============================================================================
// AvatarSession
// ============================================================================

/// A live avatar whose document and raster follow every change.
///
/// Setters return immediately; the derived cells recompute in the
/// background and supersede any computation still running against older
/// values.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use avatar_composer::{AccessoryFragment, AvatarSession, RenderRequest};
///
/// let session = AvatarSession::new();
/// session.set_accessories(vec![AccessoryFragment::new(
///     "hat",
///     10,
///     r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 8 8"><rect class="band" width="8" height="2"/></svg>"#,
/// )
/// .with_customizable(["band"])]);
/// session.set_color("band", "#aa2222");
/// session.set_render_request(Some(RenderRequest::square(32)));
///
/// let document = session.settled_document().await.unwrap().unwrap();
/// assert!(document.stylesheet().contains(".hat-band{fill:#aa2222}"));
///
/// let raster = session.settled_raster().await.unwrap().unwrap();
/// assert_eq!(raster.mime_type, "image/png");
/// # }
/// ```
pub struct AvatarSession {
    accessories: Source<Vec<AccessoryFragment>>,
    view_box: Source<Option<ViewBox>>,
    palette: Source<StylePalette>,
    render: Source<Option<RenderRequest>>,

    document: ReactiveCell<Option<Arc<ComposedDocument>>, AvatarError>,
    raster: ReactiveCell<Option<RasterResult>, AvatarError>,
    cache: SerializedSlot<RasterCache>,
}

impl AvatarSession {
    /// Creates an empty session with its own raster serializer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_serializer(ExecutionSerializer::new())
    }

    /// Creates an empty session whose drawing is serialized with every other
    /// user of `serializer`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_serializer(serializer: ExecutionSerializer) -> Self {
        let accessories = Source::new(Vec::new());
        let view_box = Source::new(None);
        let palette = Source::new(StylePalette::new());
        let render = Source::new(None);
        let cache = SerializedSlot::with_serializer(serializer, RasterCache::default());

        let document = ReactiveCell::new(
            "document",
            None,
            &[&accessories, &view_box, &palette],
            {
                let (accessories, view_box, palette) =
                    (accessories.clone(), view_box.clone(), palette.clone());
                move |supersession| {
                    let avatar = Avatar {
                        accessories: accessories.get(),
                        view_box: view_box.get(),
                    };
                    compose_document(avatar, palette.get(), supersession)
                }
            },
        );

        let raster = ReactiveCell::new("raster", None, &[&document, &render], {
            let (document, render, cache) = (document.clone(), render.clone(), cache.clone());
            move |supersession| {
                render_raster(document.get(), render.get(), cache.clone(), supersession)
            }
        });

        Self {
            accessories,
            view_box,
            palette,
            render,
            document,
            raster,
            cache,
        }
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// Replaces the accessories and the `viewBox` override.
    pub fn load(&self, avatar: Avatar) {
        self.view_box.set_if_changed(avatar.view_box);
        self.accessories.set_if_changed(avatar.accessories);
    }

    pub fn set_accessories(&self, accessories: Vec<AccessoryFragment>) {
        self.accessories.set_if_changed(accessories);
    }

    /// Adds an accessory, replacing any accessory with the same id.
    pub fn put_accessory(&self, accessory: AccessoryFragment) {
        let mut accessories = self.accessories.get();
        match accessories.iter_mut().find(|existing| existing.id == accessory.id) {
            Some(existing) => *existing = accessory,
            None => accessories.push(accessory),
        }
        self.accessories.set_if_changed(accessories);
    }

    /// Removes the accessory with the given id. Returns true if one was
    /// removed.
    pub fn remove_accessory(&self, id: &str) -> bool {
        let mut accessories = self.accessories.get();
        let before = accessories.len();
        accessories.retain(|accessory| accessory.id != id);
        accessories.len() != before && self.accessories.set_if_changed(accessories)
    }

    pub fn set_view_box(&self, view_box: Option<ViewBox>) {
        self.view_box.set_if_changed(view_box);
    }

    pub fn set_palette(&self, palette: StylePalette) {
        self.palette.set_if_changed(palette);
    }

    /// Sets the fill of one customizable class.
    pub fn set_color(&self, class_name: impl Into<String>, fill: impl Into<String>) {
        let mut palette = self.palette.get();
        palette.set(class_name, fill);
        self.palette.set_if_changed(palette);
    }

    /// Sets the raster settings. `None` stops producing rasters.
    pub fn set_render_request(&self, request: Option<RenderRequest>) {
        self.render.set_if_changed(request);
    }

    /// The current accessories and `viewBox` override.
    pub fn avatar(&self) -> Avatar {
        Avatar {
            accessories: self.accessories.get(),
            view_box: self.view_box.get(),
        }
    }

    pub fn palette(&self) -> StylePalette {
        self.palette.get()
    }

    pub fn render_request(&self) -> Option<RenderRequest> {
        self.render.get()
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    /// The composed document; `None` while there are no accessories.
    pub fn document(&self) -> &ReactiveCell<Option<Arc<ComposedDocument>>, AvatarError> {
        &self.document
    }

    /// The raster; `None` while there is no document or no render request.
    pub fn raster(&self) -> &ReactiveCell<Option<RasterResult>, AvatarError> {
        &self.raster
    }

    /// Waits for the document to catch up with the current inputs.
    pub async fn settled_document(&self) -> Result<Option<Arc<ComposedDocument>>, AvatarError> {
        self.document.settled().await
    }

    /// Waits for the document and then the raster to catch up with the
    /// current inputs.
    pub async fn settled_raster(&self) -> Result<Option<RasterResult>, AvatarError> {
        // A newly applied document restarts the raster before this returns.
        let _ = self.document.settled().await;
        self.raster.settled().await
    }

    /// Number of rasters cached for the current document.
    pub fn cached_rasters(&self) -> usize {
        self.cache.get().entries.len()
    }

    /// Drops every cached raster once in-flight drawing has finished.
    pub async fn clear_cache(&self) {
        self.cache.replace(RasterCache::default()).await;
    }
}

impl Default for AvatarSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for AvatarSession {
    /// Applies a profile's palette, `viewBox` override, and raster settings.
    ///
    /// Accessories are not part of a profile and are left alone.
    fn apply_profile(&mut self, profile: &AvatarProfile) {
        self.set_palette(profile.palette.clone());
        self.set_view_box(profile.view_box);
        self.set_render_request(profile.render.clone());
    }

    fn export_profile(&self) -> AvatarProfile {
        AvatarProfile {
            palette: self.palette.get(),
            view_box: self.view_box.get(),
            render: self.render.get(),
        }
    }
}

// ============================================================================
// Raster Cache
// ============================================================================

/// Rasters of one document, keyed by request.
///
/// Storing a raster for a different document drops the old entries.
#[derive(Debug, Clone, Default)]
struct RasterCache {
    fingerprint: u64,
    entries: HashMap<RenderRequest, RasterResult>,
}

impl RasterCache {
    fn get(&self, fingerprint: u64, request: &RenderRequest) -> Option<&RasterResult> {
        if self.fingerprint == fingerprint {
            self.entries.get(request)
        } else {
            None
        }
    }

    fn store(&mut self, fingerprint: u64, request: RenderRequest, raster: RasterResult) {
        if self.fingerprint != fingerprint {
            self.entries.clear();
            self.fingerprint = fingerprint;
        }
        self.entries.insert(request, raster);
    }
}

fn fingerprint(document: &ComposedDocument) -> u64 {
    let mut hasher = DefaultHasher::new();
    document.to_xml().hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Computations
// ============================================================================

async fn compose_document(
    avatar: Avatar,
    palette: StylePalette,
    supersession: Supersession,
) -> Result<Option<Arc<ComposedDocument>>, Interrupt<AvatarError>> {
    if avatar.accessories.is_empty() {
        return Ok(None);
    }
    supersession.check::<AvatarError>()?;
    let document = compose(&avatar, &palette)?;
    Ok(Some(Arc::new(document)))
}

async fn render_raster(
    document: Result<Option<Arc<ComposedDocument>>, AvatarError>,
    request: Option<RenderRequest>,
    cache: SerializedSlot<RasterCache>,
    supersession: Supersession,
) -> Result<Option<RasterResult>, Interrupt<AvatarError>> {
    let (Some(document), Some(request)) = (document?, request) else {
        return Ok(None);
    };
    let fingerprint = fingerprint(&document);

    let raster = cache
        .update(|mut cache| async move {
            if let Some(raster) = cache.get(fingerprint, &request) {
                log::trace!("raster cache hit for {}x{}", request.width, request.height);
                let raster = raster.clone();
                return (cache, Ok(raster));
            }
            match draw(document, request.clone(), &supersession).await {
                Ok(raster) => {
                    cache.store(fingerprint, request, raster.clone());
                    (cache, Ok(raster))
                }
                Err(err) => (cache, Err(err)),
            }
        })
        .await?;

    Ok(Some(raster))
}

async fn draw(
    document: Arc<ComposedDocument>,
    request: RenderRequest,
    supersession: &Supersession,
) -> Result<RasterResult, Interrupt<AvatarError>> {
    // Skip the draw if a newer request arrived while waiting for the host.
    supersession.check::<AvatarError>()?;

    let mut task = tokio::task::spawn_blocking(move || render(&document, &request));
    let joined = match supersession.guard::<_, AvatarError>(&mut task).await {
        Ok(joined) => joined,
        Err(interrupt) => {
            // A blocking draw cannot be stopped; keep the host until it ends.
            let _ = task.await;
            return Err(interrupt);
        }
    };
    let raster = joined.map_err(|err| AvatarError::HostDraw(err.to_string()))??;
    Ok(raster)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RasterFormat;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G'];

    fn hat() -> AccessoryFragment {
        AccessoryFragment::new(
            "hat",
            20,
            r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16">
  <style>.band { stroke: black }</style>
  <rect class="band" width="16" height="4"/>
</svg>"##,
        )
        .with_customizable(["band"])
    }

    fn face() -> AccessoryFragment {
        AccessoryFragment::new(
            "face",
            10,
            r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16">
  <circle class="skin" cx="8" cy="8" r="8"/>
</svg>"##,
        )
        .with_customizable(["skin"])
    }

    fn colored_session() -> AvatarSession {
        let session = AvatarSession::new();
        session.set_palette(StylePalette::new().with("band", "#ff0000").with("skin", "#f1c27d"));
        session.set_accessories(vec![hat(), face()]);
        session
    }

    #[tokio::test]
    async fn empty_session_produces_nothing() {
        let session = AvatarSession::new();
        session.set_render_request(Some(RenderRequest::square(8)));

        assert_eq!(session.settled_document().await, Ok(None));
        assert_eq!(session.settled_raster().await, Ok(None));
    }

    #[tokio::test]
    async fn document_follows_accessories_and_palette() {
        let session = colored_session();

        let document = session.settled_document().await.unwrap().unwrap();
        assert_eq!(document.namespaces(), vec!["face", "hat"]);
        assert!(document.stylesheet().contains(".hat-band{fill:#ff0000}"));

        session.set_color("band", "#00ff00");
        let document = session.settled_document().await.unwrap().unwrap();
        assert!(document.stylesheet().contains(".hat-band{fill:#00ff00}"));

        assert!(session.remove_accessory("hat"));
        let document = session.settled_document().await.unwrap().unwrap();
        assert_eq!(document.namespaces(), vec!["face"]);
    }

    #[tokio::test]
    async fn missing_palette_entry_surfaces_until_fixed() {
        let session = AvatarSession::new();
        session.put_accessory(hat());

        assert_eq!(
            session.settled_document().await,
            Err(AvatarError::MissingPaletteEntry {
                accessory_id: "hat".into(),
                class_name: "band".into(),
            })
        );

        session.set_color("band", "navy");
        assert!(session.settled_document().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn raster_follows_render_request() {
        let session = colored_session();
        assert_eq!(session.settled_raster().await, Ok(None));

        session.set_render_request(Some(RenderRequest::new(32, 32)));
        let raster = session.settled_raster().await.unwrap().unwrap();
        assert_eq!((raster.width, raster.height), (32, 32));
        assert!(raster.bytes.starts_with(PNG_SIGNATURE));

        session.set_render_request(Some(RenderRequest::square(16).with_format(RasterFormat::Jpeg)));
        let raster = session.settled_raster().await.unwrap().unwrap();
        assert_eq!(raster.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn document_errors_propagate_to_raster() {
        let session = AvatarSession::new();
        session.set_render_request(Some(RenderRequest::square(8)));
        session.put_accessory(hat());

        assert!(matches!(
            session.settled_raster().await,
            Err(AvatarError::MissingPaletteEntry { .. })
        ));
    }

    #[tokio::test]
    async fn rasters_are_cached_per_document() {
        let session = colored_session();

        session.set_render_request(Some(RenderRequest::square(16)));
        let first = session.settled_raster().await.unwrap().unwrap();
        session.set_render_request(Some(RenderRequest::square(24)));
        session.settled_raster().await.unwrap();
        assert_eq!(session.cached_rasters(), 2);

        session.set_render_request(Some(RenderRequest::square(16)));
        assert_eq!(session.settled_raster().await.unwrap(), Some(first));
        assert_eq!(session.cached_rasters(), 2);

        session.set_color("skin", "#8d5524");
        session.settled_raster().await.unwrap();
        assert_eq!(session.cached_rasters(), 1);

        session.clear_cache().await;
        assert_eq!(session.cached_rasters(), 0);
    }

    #[tokio::test]
    async fn rapid_palette_changes_settle_on_the_last() {
        let session = colored_session();
        session.set_render_request(Some(RenderRequest::square(8)));

        for fill in ["#010101", "#020202", "#030303"] {
            session.set_color("band", fill);
        }

        let document = session.settled_document().await.unwrap().unwrap();
        assert!(document.stylesheet().contains(".hat-band{fill:#030303}"));
        assert!(session.settled_raster().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn putting_an_identical_accessory_is_a_no_op() {
        let session = colored_session();
        session.settled_document().await.unwrap();
        let generation = session.document().generation();

        session.put_accessory(hat());
        assert!(!session.document().is_computing());
        assert_eq!(session.document().generation(), generation);

        session.put_accessory(hat().with_customizable(["band", "skin"]));
        assert_eq!(session.document().generation(), generation + 1);
        session.settled_document().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn settled_raster_matches_the_latest_inputs() {
        let session = AvatarSession::new();
        for step in 0..100u32 {
            session.set_palette(
                StylePalette::new()
                    .with("band", format!("#{:06x}", step))
                    .with("skin", "#f1c27d"),
            );
            session.set_render_request(Some(RenderRequest::square(8 + step % 5)));
            if step % 2 == 0 {
                session.set_accessories(vec![hat(), face()]);
            } else {
                session.set_accessories(vec![face()]);
            }

            let raster = session.settled_raster().await;
            let raster = raster.unwrap().unwrap_or_else(|| panic!("step {step}: no raster"));
            assert_eq!(raster.width, 8 + step % 5, "step {step}");
        }
    }

    #[tokio::test]
    async fn superseded_draw_keeps_the_shared_host_busy() {
        let host = ExecutionSerializer::new();
        let session = AvatarSession::with_serializer(host.clone());
        session.set_palette(StylePalette::new().with("band", "#ff0000").with("skin", "#f1c27d"));
        session.set_accessories(vec![hat(), face()]);
        session.settled_document().await.unwrap();

        session.set_render_request(Some(RenderRequest::square(4096)));
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while !host.is_busy() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Supersede the large draw while it is still on the blocking pool.
        session.set_render_request(None);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(host.is_busy());

        assert_eq!(session.settled_raster().await, Ok(None));
        host.run(|| async {}).await;
        assert!(!host.is_busy());
        assert_eq!(session.cached_rasters(), 0);
    }

    #[tokio::test]
    async fn profile_round_trips_through_session() {
        let profile = AvatarProfile::new()
            .with_color("skin", "#f1c27d")
            .with_view_box(ViewBox::new(0.0, 0.0, 16.0, 8.0))
            .with_render(RenderRequest::new(32, 16));

        let mut session = AvatarSession::new();
        session.apply_profile(&profile);
        assert_eq!(session.export_profile(), profile);

        session.put_accessory(face());
        let document = session.settled_document().await.unwrap().unwrap();
        assert_eq!(document.view_box(), Some("0 0 16 8"));

        let raster = session.settled_raster().await.unwrap().unwrap();
        assert_eq!((raster.width, raster.height), (32, 16));
    }
}
