//! Rasterisation of composed documents using resvg/usvg.
//!
//! The renderer serializes a [`ComposedDocument`], lets usvg parse it, draws
//! it with resvg at exactly the requested pixel size, and encodes the result
//! with the `image` crate. The caller is responsible for choosing a size that
//! matches the document's aspect ratio.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use palette::Srgb;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};
use serde::{Deserialize, Serialize};

use crate::composer::ComposedDocument;
use crate::error::AvatarError;

// ============================================================================
// ViewBox
// ============================================================================

/// The `viewBox` of an SVG document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewBox {
    pub min_x: f32,
    pub min_y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewBox {
    pub fn new(min_x: f32, min_y: f32, width: f32, height: f32) -> Self {
        Self {
            min_x,
            min_y,
            width,
            height,
        }
    }

    /// Parses `min-x min-y width height`, separated by whitespace and/or commas.
    ///
    /// Width and height must be positive; every number must be finite.
    pub fn parse(value: &str) -> Result<Self, AvatarError> {
        let invalid = || AvatarError::ViewBox {
            value: Some(value.to_string()),
        };

        let numbers = value
            .split(|ch: char| ch.is_ascii_whitespace() || ch == ',')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<f32>().ok().filter(|n| n.is_finite()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;

        match numbers.as_slice() {
            &[min_x, min_y, width, height] if width > 0.0 && height > 0.0 => {
                Ok(Self::new(min_x, min_y, width, height))
            }
            _ => Err(invalid()),
        }
    }

    /// Height divided by width.
    pub fn aspect_ratio(&self) -> f32 {
        self.height / self.width
    }
}

impl fmt::Display for ViewBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.min_x, self.min_y, self.width, self.height)
    }
}

impl FromStr for ViewBox {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ViewBox {
    type Error = AvatarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ViewBox> for String {
    fn from(view_box: ViewBox) -> Self {
        view_box.to_string()
    }
}

// ============================================================================
// Requests and Results
// ============================================================================

/// Output encoding of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    #[default]
    Png,
    Jpeg,
}

impl RasterFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Target size and encoding for one rasterisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub format: RasterFormat,

    /// Hex colour (`#rgb` or `#rrggbb`) to flatten onto. JPEG output without
    /// a background is flattened onto white.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl RenderRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: RasterFormat::Png,
            background: None,
        }
    }

    /// A square PNG request.
    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn with_format(mut self, format: RasterFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }
}

/// An encoded bitmap.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterResult {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for RasterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterResult")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Draws a composed document at exactly `request.width x request.height`.
///
/// The document is only read. The `viewBox` is validated before anything is
/// drawn.
///
/// # Errors
///
/// - [`AvatarError::ViewBox`] if the root has no valid `viewBox`
/// - [`AvatarError::HostDraw`] if parsing, drawing, or encoding fails
pub fn render(
    document: &ComposedDocument,
    request: &RenderRequest,
) -> Result<RasterResult, AvatarError> {
    let view_box = document
        .view_box()
        .ok_or(AvatarError::ViewBox { value: None })
        .and_then(ViewBox::parse)?;
    let background = request
        .background
        .as_deref()
        .map(parse_background)
        .transpose()?;

    let image = draw(&document.to_xml(), request.width, request.height)?;
    log::trace!(
        "drew {}x{} raster from viewBox {}",
        request.width,
        request.height,
        view_box
    );

    let image = match (background, request.format) {
        (Some(color), _) => flatten(&image, color),
        (None, RasterFormat::Jpeg) => flatten(&image, Rgba([255, 255, 255, 255])),
        (None, RasterFormat::Png) => image,
    };
    let bytes = encode(image, request.format)?;

    Ok(RasterResult {
        bytes,
        mime_type: request.format.mime_type(),
        width: request.width,
        height: request.height,
    })
}

/// Parses and draws an SVG string, stretched to `width x height`.
fn draw(svg_data: &str, width: u32, height: u32) -> Result<RgbaImage, AvatarError> {
    let opts = Options::default();
    let tree = Tree::from_str(svg_data, &opts)
        .map_err(|err| AvatarError::HostDraw(format!("usvg rejected document: {err}")))?;

    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        AvatarError::HostDraw(format!("cannot allocate {width}x{height} pixmap"))
    })?;

    let svg_size = tree.size();
    let transform = Transform::from_scale(
        width as f32 / svg_size.width(),
        height as f32 / svg_size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    Ok(pixmap_to_rgba_image(&pixmap))
}

fn encode(image: RgbaImage, format: RasterFormat) -> Result<Vec<u8>, AvatarError> {
    let image = match format {
        // JPEG has no alpha channel.
        RasterFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        RasterFormat::Png => DynamicImage::ImageRgba8(image),
    };

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format.image_format())
        .map_err(|err| AvatarError::HostDraw(format!("encoding failed: {err}")))?;
    Ok(bytes)
}

fn parse_background(value: &str) -> Result<Rgba<u8>, AvatarError> {
    let color: Srgb<u8> = value
        .parse()
        .map_err(|err| AvatarError::HostDraw(format!("invalid background '{value}': {err}")))?;
    Ok(Rgba([color.red, color.green, color.blue, 255]))
}

/// Composites an image over an opaque background colour.
fn flatten(image: &RgbaImage, background: Rgba<u8>) -> RgbaImage {
    let mut dest = RgbaImage::from_pixel(image.width(), image.height(), background);
    composite_over(&mut dest, image);
    dest
}

/// Converts a tiny_skia Pixmap to an image::RgbaImage.
fn pixmap_to_rgba_image(pixmap: &Pixmap) -> RgbaImage {
    let mut img = RgbaImage::new(pixmap.width(), pixmap.height());

    for (pixel, out) in pixmap.pixels().iter().zip(img.pixels_mut()) {
        // tiny_skia uses premultiplied alpha, we need to unpremultiply
        let (r, g, b, a) = unpremultiply(pixel.red(), pixel.green(), pixel.blue(), pixel.alpha());
        *out = Rgba([r, g, b, a]);
    }

    img
}

/// Unpremultiplies a premultiplied alpha pixel.
fn unpremultiply(r: u8, g: u8, b: u8, a: u8) -> (u8, u8, u8, u8) {
    if a == 0 {
        (0, 0, 0, 0)
    } else {
        let a_f = a as f32 / 255.0;
        (
            (r as f32 / a_f).round().min(255.0) as u8,
            (g as f32 / a_f).round().min(255.0) as u8,
            (b as f32 / a_f).round().min(255.0) as u8,
            a,
        )
    }
}

/// Alpha blends `src` over `dest` (same dimensions).
fn composite_over(dest: &mut RgbaImage, src: &RgbaImage) {
    for (dst_pixel, src_pixel) in dest.pixels_mut().zip(src.pixels()) {
        *dst_pixel = alpha_blend(*src_pixel, *dst_pixel);
    }
}

/// Alpha blends two RGBA pixels (source over destination).
fn alpha_blend(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;

    let out_a = sa + da * (1.0 - sa);

    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend = |s: u8, d: u8| -> u8 {
        let sf = s as f32 / 255.0;
        let df = d as f32 / 255.0;
        let out = (sf * sa + df * da * (1.0 - sa)) / out_a;
        (out * 255.0).round() as u8
    };

    Rgba([
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::{AccessoryFragment, StylePalette};
    use crate::composer::{Avatar, compose};

    const SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><style>.body { fill: #0000ff }</style><rect class="body" width="100" height="100"/></svg>"##;

    fn document(svg: &str) -> ComposedDocument {
        let avatar = Avatar::new(vec![
            AccessoryFragment::new("body", 1, svg).with_customizable(["body"]),
        ]);
        compose(&avatar, &StylePalette::new().with("body", "#ff0000")).unwrap()
    }

    fn decode(result: &RasterResult) -> RgbaImage {
        image::load_from_memory(&result.bytes).unwrap().to_rgba8()
    }

    #[test]
    fn view_box_parsing() {
        assert_eq!(
            ViewBox::parse("0 0 100 50").unwrap(),
            ViewBox::new(0.0, 0.0, 100.0, 50.0)
        );
        assert_eq!(
            ViewBox::parse(" -5,-5, 10 ,20 ").unwrap(),
            ViewBox::new(-5.0, -5.0, 10.0, 20.0)
        );
        for bad in ["", "0 0 100", "0 0 0 10", "0 0 10 -1", "a b c d", "0 0 10 10 10", "0 0 inf 1"] {
            assert!(ViewBox::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn renders_at_requested_size_with_palette_colour() {
        let doc = document(SQUARE);
        let result = render(&doc, &RenderRequest::new(40, 20)).unwrap();

        assert_eq!(result.mime_type, "image/png");
        let img = decode(&result);
        assert_eq!(img.dimensions(), (40, 20));
        // The palette rule comes last and wins over the accessory's blue.
        assert_eq!(img.get_pixel(20, 10).0, [255, 0, 0, 255]);
    }

    #[test]
    fn does_not_mutate_the_document() {
        let doc = document(SQUARE);
        let before = doc.clone();
        render(&doc, &RenderRequest::square(16)).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn missing_view_box_fails_before_drawing() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"/>"#;
        let err = render(&document(svg), &RenderRequest::square(16)).unwrap_err();
        assert_eq!(err, AvatarError::ViewBox { value: None });
    }

    #[test]
    fn malformed_view_box_is_reported() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10"/>"#;
        let err = render(&document(svg), &RenderRequest::square(16)).unwrap_err();
        assert_eq!(
            err,
            AvatarError::ViewBox {
                value: Some("0 0 10".into())
            }
        );
    }

    #[test]
    fn zero_size_is_a_draw_error() {
        let err = render(&document(SQUARE), &RenderRequest::new(0, 10)).unwrap_err();
        assert!(matches!(err, AvatarError::HostDraw(_)));
    }

    #[test]
    fn jpeg_is_flattened_onto_background() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><g/></svg>"#;
        let request = RenderRequest::square(8)
            .with_format(RasterFormat::Jpeg)
            .with_background("#000");
        let result = render(&document(svg), &request).unwrap();

        assert_eq!(result.mime_type, "image/jpeg");
        let pixel = decode(&result).get_pixel(4, 4).0;
        assert!(pixel[0] < 8 && pixel[1] < 8 && pixel[2] < 8, "{pixel:?}");
    }

    #[test]
    fn invalid_background_is_rejected() {
        let request = RenderRequest::square(8).with_background("not a colour");
        let err = render(&document(SQUARE), &request).unwrap_err();
        assert!(matches!(err, AvatarError::HostDraw(_)));
    }

    #[test]
    fn alpha_blend_over_opaque() {
        let blended = alpha_blend(Rgba([0, 0, 255, 128]), Rgba([255, 0, 0, 255]));
        assert_eq!(blended[3], 255);
        assert!(blended[0] > 0 && blended[2] > 0);
    }
}
