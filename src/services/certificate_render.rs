use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontRef, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage, RgbImage, imageops};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;

use crate::models::CertificateRecipient;

/// Logical template size, landscape. Captured at `CAPTURE_SCALE` for print
/// quality.
pub const TEMPLATE_WIDTH: u32 = 1123;
pub const TEMPLATE_HEIGHT: u32 = 794;
pub const CAPTURE_SCALE: u32 = 2;

// A4 landscape in PDF points.
const PAGE_WIDTH: f32 = 841.89;
const PAGE_HEIGHT: f32 = 595.28;

// Text baselines in logical pixels from the top of the template.
const NAME_SIZE: f32 = 64.0;
const NAME_Y: u32 = 330;
const COLLEGE_SIZE: f32 = 36.0;
const COLLEGE_Y: u32 = 430;
const EVENT_SIZE: f32 = 30.0;
const EVENT_Y: u32 = 500;

const TEXT_COLOR: Rgba<u8> = Rgba([36, 34, 64, 255]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Certificate asset missing: {0}")]
    Assets(String),

    #[error("Certificate font invalid: {0}")]
    Font(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rendered certificate raster. Transient: owned by one generation call,
/// encoded or uploaded, then dropped. Never cached across recipients.
#[derive(Debug, Clone)]
pub struct RenderedCertificate {
    pub image: RgbImage,
}

impl RenderedCertificate {
    /// Base64 PNG payload for the email-dispatch endpoint.
    pub fn to_data_url(&self) -> Result<String, RenderError> {
        use base64::Engine;

        let mut png = Vec::new();
        PngEncoder::new(Cursor::new(&mut png)).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgb8,
        )?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        Ok(format!("data:image/png;base64,{encoded}"))
    }

    /// Encode as a single-page landscape A4 document with the raster filling
    /// the page.
    pub fn to_pdf(&self) -> Result<Vec<u8>, RenderError> {
        use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref};

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), 90).encode(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgb8,
        )?;

        let catalog_id = Ref::new(1);
        let page_tree_id = Ref::new(2);
        let page_id = Ref::new(3);
        let image_id = Ref::new(4);
        let content_id = Ref::new(5);
        let image_name = Name(b"Cert");

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(page_tree_id);
        pdf.pages(page_tree_id).kids([page_id]).count(1);

        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
        page.parent(page_tree_id);
        page.contents(content_id);
        page.resources().x_objects().pair(image_name, image_id);
        page.finish();

        let mut xobject = pdf.image_xobject(image_id, &jpeg);
        xobject.filter(Filter::DctDecode);
        xobject.width(self.image.width() as i32);
        xobject.height(self.image.height() as i32);
        xobject.color_space().device_rgb();
        xobject.bits_per_component(8);
        xobject.finish();

        let mut content = Content::new();
        content.save_state();
        content.transform([PAGE_WIDTH, 0.0, 0.0, PAGE_HEIGHT, 0.0, 0.0]);
        content.x_object(image_name);
        content.restore_state();
        pdf.stream(content_id, &content.finish());

        Ok(pdf.finish())
    }
}

/// Rasterizer seam. The implementation owns the single template slot, so a
/// `&mut` borrow is the exclusivity guarantee: one render at a time, released
/// when the call returns, success or not.
pub trait CertificateRenderer {
    fn render(&mut self, recipient: &CertificateRecipient)
    -> Result<RenderedCertificate, RenderError>;
}

/// The off-screen certificate template: a static background with recipient
/// fields drawn over it at fixed positions.
#[derive(Debug)]
pub struct CertificateTemplate {
    background: RgbaImage,
    font_data: Vec<u8>,
}

impl CertificateTemplate {
    pub fn load(assets_dir: &Path) -> Result<Self, RenderError> {
        let background_path = assets_dir.join("certificate-background.png");
        if !background_path.is_file() {
            return Err(RenderError::Assets(format!(
                "background image not found at {}",
                background_path.display()
            )));
        }

        let font_path = assets_dir.join("certificate-font.ttf");
        if !font_path.is_file() {
            return Err(RenderError::Assets(format!(
                "font not found at {}",
                font_path.display()
            )));
        }

        let background = image::open(&background_path)?
            .resize_exact(
                TEMPLATE_WIDTH * CAPTURE_SCALE,
                TEMPLATE_HEIGHT * CAPTURE_SCALE,
                imageops::FilterType::Triangle,
            )
            .to_rgba8();

        let font_data = std::fs::read(&font_path)?;
        // Validate up front so a bad font fails at startup, not mid-batch.
        FontRef::try_from_slice(&font_data).map_err(|err| RenderError::Font(err.to_string()))?;

        Ok(Self {
            background,
            font_data,
        })
    }
}

impl CertificateRenderer for CertificateTemplate {
    fn render(
        &mut self,
        recipient: &CertificateRecipient,
    ) -> Result<RenderedCertificate, RenderError> {
        let width = TEMPLATE_WIDTH * CAPTURE_SCALE;
        let height = TEMPLATE_HEIGHT * CAPTURE_SCALE;

        // Opaque white base: transparent template regions must not leak
        // through into the capture.
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        imageops::overlay(&mut canvas, &self.background, 0, 0);

        let font = FontRef::try_from_slice(&self.font_data)
            .map_err(|err| RenderError::Font(err.to_string()))?;

        draw_centered(&mut canvas, &font, &recipient.name, NAME_SIZE, NAME_Y);
        draw_centered(&mut canvas, &font, &recipient.college, COLLEGE_SIZE, COLLEGE_Y);
        let event_line = format!("for participating in {}", recipient.event_name);
        draw_centered(&mut canvas, &font, &event_line, EVENT_SIZE, EVENT_Y);

        let image = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
        Ok(RenderedCertificate { image })
    }
}

fn draw_centered(canvas: &mut RgbaImage, font: &FontRef<'_>, text: &str, size: f32, y: u32) {
    let scale = PxScale::from(size * CAPTURE_SCALE as f32);
    let (text_width, _) = text_size(scale, font, text);
    let x = (canvas.width().saturating_sub(text_width)) / 2;
    draw_text_mut(
        canvas,
        TEXT_COLOR,
        x as i32,
        (y * CAPTURE_SCALE) as i32,
        scale,
        font,
        text,
    );
}

/// Deterministic download name: `{Name}-{Event}-certificate` with whitespace
/// collapsed to underscores.
pub fn certificate_file_stem(name: &str, event_name: &str) -> String {
    let normalize = |value: &str| value.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{}-{}-certificate", normalize(name), normalize(event_name))
}
