use crate::config::print::{PrintSettings, PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
use crate::core::acquire::ImageAcquirer;
use crate::core::cancel::CancelSignal;
use crate::core::layout::{PageLayout, Rect};
use crate::domain::model::{CardRecord, GenerationProgress, PagePlan, ProgressFn};
use crate::utils::error::{Result, SheetError};
use image::{ImageFormat, RgbImage};
use printpdf::{
    BuiltinFont, Color, ColorBits, ColorSpace, Image, ImageTransform, ImageXObject,
    IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point, Px,
    Rgb,
};
use std::io::BufWriter;
use std::path::Path;

/// A serialized document smaller than this is a corrupt build, not a PDF.
const MIN_PDF_BYTES: usize = 1000;

const PLACEHOLDER_FONT_PT: f32 = 9.0;

/// Identifies the decode format from the leading magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

/// Decode routing: the sniffed format is always tried first, the
/// alternate only on rejection.
pub fn decode_order(bytes: &[u8]) -> [ImageFormat; 2] {
    match sniff_format(bytes) {
        Some(ImageFormat::Png) => [ImageFormat::Png, ImageFormat::Jpeg],
        _ => [ImageFormat::Jpeg, ImageFormat::Png],
    }
}

/// Decodes card bytes to RGB, reporting which format succeeded.
pub fn decode_card_image(bytes: &[u8]) -> Result<(RgbImage, ImageFormat)> {
    let mut last_error = None;
    for format in decode_order(bytes) {
        match image::load_from_memory_with_format(bytes, format) {
            Ok(decoded) => return Ok((decoded.to_rgb8(), format)),
            Err(e) => last_error = Some(e),
        }
    }
    Err(SheetError::Embed {
        reason: format!(
            "bytes decode as neither JPEG nor PNG: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ),
    })
}

fn xobject_from_rgb(rgb: &RgbImage) -> Image {
    let (width, height) = rgb.dimensions();
    Image::from(ImageXObject {
        width: Px(width as usize),
        height: Px(height as usize),
        color_space: ColorSpace::Rgb,
        bits_per_component: ColorBits::Bit8,
        interpolate: true,
        image_data: rgb.as_raw().clone(),
        image_filter: None,
        clipping_bbox: None,
        smask: None,
    })
}

/// Places a decoded image so it exactly covers `target` (mm).
fn place_image(layer: &PdfLayerReference, rgb: &RgbImage, target: &Rect) {
    let (px_w, px_h) = rgb.dimensions();
    let dpi = px_w as f32 / (target.w as f32 / 25.4);
    let natural_h_mm = px_h as f32 / dpi * 25.4;
    let scale_y = target.h as f32 / natural_h_mm;

    xobject_from_rgb(rgb).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(target.x as f32)),
            translate_y: Some(Mm(target.y as f32)),
            scale_x: Some(1.0),
            scale_y: Some(scale_y),
            dpi: Some(dpi),
            ..Default::default()
        },
    );
}

fn stroke_rect(layer: &PdfLayerReference, rect: &Rect, gray: f32, thickness_mm: f64) {
    layer.set_outline_color(Color::Rgb(Rgb::new(gray, gray, gray, None)));
    // printpdf outline thickness is in points.
    layer.set_outline_thickness(thickness_mm as f32 * 72.0 / 25.4);
    let points = vec![
        (Point::new(Mm(rect.x as f32), Mm(rect.y as f32)), false),
        (Point::new(Mm(rect.right() as f32), Mm(rect.y as f32)), false),
        (
            Point::new(Mm(rect.right() as f32), Mm(rect.top() as f32)),
            false,
        ),
        (Point::new(Mm(rect.x as f32), Mm(rect.top() as f32)), false),
    ];
    layer.add_line(Line {
        points,
        is_closed: true,
    });
}

fn draw_segment(layer: &PdfLayerReference, x1: f64, y1: f64, x2: f64, y2: f64) {
    let points = vec![
        (Point::new(Mm(x1 as f32), Mm(y1 as f32)), false),
        (Point::new(Mm(x2 as f32), Mm(y2 as f32)), false),
    ];
    layer.add_line(Line {
        points,
        is_closed: false,
    });
}

/// Builds the document page by page from the preloaded cache. Per-image
/// and per-page failures degrade to placeholders; only cancellation and
/// serialization failure escape.
pub struct SheetAssembler<'a> {
    settings: &'a PrintSettings,
    layout: &'a PageLayout,
    cancel: CancelSignal,
}

impl<'a> SheetAssembler<'a> {
    pub fn new(settings: &'a PrintSettings, layout: &'a PageLayout, cancel: CancelSignal) -> Self {
        Self {
            settings,
            layout,
            cancel,
        }
    }

    pub async fn build(
        &self,
        records: &[CardRecord],
        resolved_urls: &[Vec<String>],
        pages: &[PagePlan],
        acquirer: &ImageAcquirer,
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        let (doc, first_page, first_layer) = PdfDocument::new(
            "Proxy sheet",
            Mm(PAGE_WIDTH_MM as f32),
            Mm(PAGE_HEIGHT_MM as f32),
            "Front 1",
        );
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| SheetError::Pdf {
                reason: format!("cannot register builtin font: {}", e),
            })?;

        for (page_index, plan) in pages.iter().enumerate() {
            self.cancel.check()?;

            let layer = if page_index == 0 {
                doc.get_page(first_page).get_layer(first_layer)
            } else {
                let (page, layer) = doc.add_page(
                    Mm(PAGE_WIDTH_MM as f32),
                    Mm(PAGE_HEIGHT_MM as f32),
                    format!("Front {}", page_index + 1),
                );
                doc.get_page(page).get_layer(layer)
            };

            if let Err(e) = self
                .draw_page(&layer, &font, records, resolved_urls, plan, acquirer)
                .await
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                // Page numbering must never desynchronize: replace the
                // whole page with placeholders for the same slot count.
                tracing::warn!("page {} failed, emitting placeholder page: {}", page_index + 1, e);
                self.draw_placeholder_page(&layer, &font, records, plan);
            }

            progress(&GenerationProgress {
                current: page_index as u32 + 1,
                total: pages.len() as u32,
                message: format!("Rendered page {}/{}", page_index + 1, pages.len()),
            });
        }

        if self.settings.back_pages {
            self.add_back_pages(&doc, pages.len(), progress)?;
        }

        serialize(doc)
    }

    async fn draw_page(
        &self,
        layer: &PdfLayerReference,
        font: &IndirectFontRef,
        records: &[CardRecord],
        resolved_urls: &[Vec<String>],
        plan: &PagePlan,
        acquirer: &ImageAcquirer,
    ) -> Result<()> {
        for (slot_index, slot) in plan.slots.iter().enumerate() {
            self.cancel.check()?;

            let record = &records[slot.record];
            let candidates = &resolved_urls[slot.record];
            let cell = self.layout.cell_rect(slot_index);
            let card = self.layout.card_rect(slot_index);

            match self.embed_slot(layer, candidates, &cell, acquirer).await {
                Ok(()) => {}
                Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                Err(e) => {
                    tracing::warn!("slot placeholder for '{}': {}", record.name, e);
                    self.draw_placeholder_slot(layer, font, record, &card);
                }
            }

            if self.settings.bleed_enabled && self.layout.bleed > 0.0 {
                stroke_rect(layer, &card, 0.6, 0.1);
            }
            if self.settings.crop_marks {
                layer.set_outline_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
                layer.set_outline_thickness(self.settings.crop_thickness_mm as f32 * 72.0 / 25.4);
                for mark in self.layout.crop_marks(&card, self.settings) {
                    draw_segment(layer, mark.x1, mark.y1, mark.x2, mark.y2);
                }
            }
        }
        Ok(())
    }

    /// Embeds the first cached candidate. A decode rejection evicts the
    /// entry and re-acquires the URL once before giving up on the slot.
    async fn embed_slot(
        &self,
        layer: &PdfLayerReference,
        candidates: &[String],
        cell: &Rect,
        acquirer: &ImageAcquirer,
    ) -> Result<()> {
        let (url, entry) = {
            let mut found = None;
            for url in candidates {
                if let Some(entry) = acquirer.cache().get(url).await {
                    found = Some((url.clone(), entry));
                    break;
                }
            }
            found.ok_or_else(|| SheetError::Acquisition {
                url: candidates.first().cloned().unwrap_or_default(),
                reason: "no cached bytes for any candidate".to_string(),
            })?
        };

        match decode_card_image(&entry.bytes) {
            Ok((rgb, _format)) => {
                place_image(layer, &rgb, cell);
                Ok(())
            }
            Err(first_failure) => {
                tracing::debug!("embed rejected cached bytes for {}: {}", url, first_failure);
                acquirer.cache().evict(&url).await;
                acquirer.failed().remove(&url).await;
                let fresh = acquirer.acquire(&url).await?;
                let (rgb, _format) = decode_card_image(&fresh.bytes)?;
                place_image(layer, &rgb, cell);
                Ok(())
            }
        }
    }

    fn draw_placeholder_slot(
        &self,
        layer: &PdfLayerReference,
        font: &IndirectFontRef,
        record: &CardRecord,
        card: &Rect,
    ) {
        stroke_rect(layer, card, 0.2, 0.3);

        let name: String = record.name.chars().take(28).collect();
        layer.set_fill_color(Color::Rgb(Rgb::new(0.1, 0.1, 0.1, None)));
        layer.use_text(
            &name,
            PLACEHOLDER_FONT_PT,
            Mm(card.x as f32 + 3.0),
            Mm((card.y + card.h / 2.0) as f32),
            font,
        );
        layer.use_text(
            "image unavailable",
            PLACEHOLDER_FONT_PT - 2.0,
            Mm(card.x as f32 + 3.0),
            Mm((card.y + card.h / 2.0) as f32 - 6.0),
            font,
        );
    }

    fn draw_placeholder_page(
        &self,
        layer: &PdfLayerReference,
        font: &IndirectFontRef,
        records: &[CardRecord],
        plan: &PagePlan,
    ) {
        for (slot_index, slot) in plan.slots.iter().enumerate() {
            let card = self.layout.card_rect(slot_index);
            self.draw_placeholder_slot(layer, font, &records[slot.record], &card);
        }
    }

    /// One full-bleed card back per front page. A missing or unreadable
    /// back image still emits blank pages so fronts and backs stay 1:1.
    fn add_back_pages(
        &self,
        doc: &PdfDocumentReference,
        front_pages: usize,
        progress: &ProgressFn<'_>,
    ) -> Result<()> {
        let back = self.load_back_image();
        if back.is_none() {
            tracing::warn!("card back unavailable, emitting blank back pages");
        }

        let full_page = Rect {
            x: 0.0,
            y: 0.0,
            w: PAGE_WIDTH_MM,
            h: PAGE_HEIGHT_MM,
        };

        for index in 0..front_pages {
            self.cancel.check()?;
            let (page, layer) = doc.add_page(
                Mm(PAGE_WIDTH_MM as f32),
                Mm(PAGE_HEIGHT_MM as f32),
                format!("Back {}", index + 1),
            );
            if let Some(rgb) = &back {
                place_image(&doc.get_page(page).get_layer(layer), rgb, &full_page);
            }
            progress(&GenerationProgress {
                current: index as u32 + 1,
                total: front_pages as u32,
                message: format!("Rendered back page {}/{}", index + 1, front_pages),
            });
        }
        Ok(())
    }

    fn load_back_image(&self) -> Option<RgbImage> {
        let path: &Path = self.settings.back_image.as_deref()?;
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("cannot read card back {}: {}", path.display(), e);
                return None;
            }
        };
        let (mut rgb, _format) = match decode_card_image(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("cannot decode card back {}: {}", path.display(), e);
                return None;
            }
        };
        if self.settings.mirror_backs {
            // Horizontal mirror for duplex alignment.
            rgb = image::imageops::flip_horizontal(&rgb);
        }
        Some(rgb)
    }
}

fn serialize(doc: PdfDocumentReference) -> Result<Vec<u8>> {
    let mut writer = BufWriter::new(std::io::Cursor::new(Vec::new()));
    doc.save(&mut writer).map_err(|e| SheetError::Pdf {
        reason: format!("serialization failed: {}", e),
    })?;
    let bytes = writer
        .into_inner()
        .map_err(|e| SheetError::Pdf {
            reason: format!("cannot flush document buffer: {}", e),
        })?
        .into_inner();

    if bytes.len() < MIN_PDF_BYTES {
        return Err(SheetError::Pdf {
            reason: format!("implausibly small document ({} bytes)", bytes.len()),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_SIG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const PNG_SIG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn jpeg_signature_routes_to_jpeg_first() {
        assert_eq!(sniff_format(&JPEG_SIG), Some(ImageFormat::Jpeg));
        assert_eq!(decode_order(&JPEG_SIG)[0], ImageFormat::Jpeg);
    }

    #[test]
    fn png_signature_routes_to_png_first() {
        assert_eq!(sniff_format(&PNG_SIG), Some(ImageFormat::Png));
        assert_eq!(decode_order(&PNG_SIG)[0], ImageFormat::Png);
    }

    #[test]
    fn unknown_bytes_still_get_a_full_decode_order() {
        let order = decode_order(&[0x00, 0x01, 0x02, 0x03]);
        assert_ne!(order[0], order[1]);
    }

    #[test]
    fn decode_round_trips_a_real_png() {
        let mut png = Vec::new();
        let img = RgbImage::from_pixel(40, 56, image::Rgb([200, 10, 10]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let (decoded, format) = decode_card_image(&png).unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert_eq!(decoded.dimensions(), (40, 56));
    }

    #[test]
    fn garbage_bytes_are_an_embed_error() {
        let err = decode_card_image(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, SheetError::Embed { .. }));
    }

    fn back_asset(dir: &std::path::Path) -> std::path::PathBuf {
        // Left column red, right column blue, so a mirror is detectable.
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(0, 1, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 0, 255]));
        img.put_pixel(1, 1, image::Rgb([0, 0, 255]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let path = dir.join("back.png");
        std::fs::write(&path, png).unwrap();
        path
    }

    #[test]
    fn mirrored_backs_flip_horizontally() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = PrintSettings {
            back_pages: true,
            mirror_backs: true,
            back_image: Some(back_asset(dir.path())),
            ..PrintSettings::default()
        };
        let layout = PageLayout::compute(&settings).unwrap();
        let assembler = SheetAssembler::new(&settings, &layout, CancelSignal::new());

        let back = assembler.load_back_image().unwrap();
        assert_eq!(back.get_pixel(0, 0), &image::Rgb([0, 0, 255]));
        assert_eq!(back.get_pixel(1, 0), &image::Rgb([255, 0, 0]));
    }

    #[test]
    fn unmirrored_backs_keep_orientation() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = PrintSettings {
            back_pages: true,
            back_image: Some(back_asset(dir.path())),
            ..PrintSettings::default()
        };
        let layout = PageLayout::compute(&settings).unwrap();
        let assembler = SheetAssembler::new(&settings, &layout, CancelSignal::new());

        let back = assembler.load_back_image().unwrap();
        assert_eq!(back.get_pixel(0, 0), &image::Rgb([255, 0, 0]));
    }

    #[test]
    fn unreadable_back_image_is_a_soft_failure() {
        let settings = PrintSettings {
            back_pages: true,
            back_image: Some("/nonexistent/back.png".into()),
            ..PrintSettings::default()
        };
        let layout = PageLayout::compute(&settings).unwrap();
        let assembler = SheetAssembler::new(&settings, &layout, CancelSignal::new());
        assert!(assembler.load_back_image().is_none());
    }
}
