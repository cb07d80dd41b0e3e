use crate::config::print::{
    PrintSettings, CARD_HEIGHT_MM, CARD_WIDTH_MM, CARDS_PER_PAGE, COLUMNS, PAGE_HEIGHT_MM,
    PAGE_WIDTH_MM, ROWS,
};
use crate::utils::error::{Result, SheetError};

/// Axis-aligned box in mm. Origin bottom-left, matching the PDF
/// coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn top(&self) -> f64 {
        self.y + self.h
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.top()
            && other.y < self.top()
    }
}

/// A short printed guide line.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Segment {
    pub fn bounding_box(&self) -> Rect {
        let x = self.x1.min(self.x2);
        let y = self.y1.min(self.y2);
        Rect {
            x,
            y,
            w: (self.x1 - self.x2).abs(),
            h: (self.y1 - self.y2).abs(),
        }
    }
}

/// Computed page geometry for one settings instance. Pure arithmetic; the
/// 3x3 grid is fixed but nothing below assumes it.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub cell_w: f64,
    pub cell_h: f64,
    pub gap: f64,
    pub margin_x: f64,
    pub margin_y: f64,
    pub bleed: f64,
    pub columns: usize,
    pub rows: usize,
}

impl PageLayout {
    /// Derives the full geometry, rejecting any configuration whose card
    /// block exceeds the printable area. Runs before any network work.
    pub fn compute(settings: &PrintSettings) -> Result<Self> {
        let bleed = if settings.bleed_enabled {
            settings.bleed_mm
        } else {
            0.0
        };
        let cell_w = CARD_WIDTH_MM + 2.0 * bleed;
        let cell_h = CARD_HEIGHT_MM + 2.0 * bleed;

        // The gap exists to give opposing crop marks of adjacent cells
        // room; without marks the cells touch.
        let gap = if settings.crop_marks {
            2.0 * settings.crop_offset_mm
        } else {
            0.0
        };

        let block_w = COLUMNS as f64 * cell_w + (COLUMNS as f64 - 1.0) * gap;
        let block_h = ROWS as f64 * cell_h + (ROWS as f64 - 1.0) * gap;

        let printable_w = PAGE_WIDTH_MM - 2.0 * settings.safe_margin_mm;
        let printable_h = PAGE_HEIGHT_MM - 2.0 * settings.safe_margin_mm;
        if block_w > printable_w || block_h > printable_h {
            return Err(SheetError::Layout {
                message: format!(
                    "card block {:.1}x{:.1}mm exceeds printable area {:.1}x{:.1}mm",
                    block_w, block_h, printable_w, printable_h
                ),
            });
        }

        // Centered when smaller than the printable area, never closer to
        // the edge than the safe margin.
        let margin_x = ((PAGE_WIDTH_MM - block_w) / 2.0).max(settings.safe_margin_mm);
        let margin_y = ((PAGE_HEIGHT_MM - block_h) / 2.0).max(settings.safe_margin_mm);

        Ok(Self {
            cell_w,
            cell_h,
            gap,
            margin_x,
            margin_y,
            bleed,
            columns: COLUMNS,
            rows: ROWS,
        })
    }

    /// Bleed-inclusive cell box for slot `index` (row-major from the
    /// visual top-left).
    pub fn cell_rect(&self, index: usize) -> Rect {
        debug_assert!(index < CARDS_PER_PAGE);
        let col = index % self.columns;
        let row = index / self.columns;

        let x = self.margin_x + col as f64 * (self.cell_w + self.gap);
        let y_top = PAGE_HEIGHT_MM - self.margin_y - row as f64 * (self.cell_h + self.gap);
        Rect {
            x,
            y: y_top - self.cell_h,
            w: self.cell_w,
            h: self.cell_h,
        }
    }

    /// Trim box (the card proper) inside a cell.
    pub fn card_rect(&self, index: usize) -> Rect {
        let cell = self.cell_rect(index);
        Rect {
            x: cell.x + self.bleed,
            y: cell.y + self.bleed,
            w: cell.w - 2.0 * self.bleed,
            h: cell.h - 2.0 * self.bleed,
        }
    }

    /// Two guide segments per card corner (horizontal + vertical), offset
    /// outward from the trim edge. They never touch the card box.
    pub fn crop_marks(&self, card: &Rect, settings: &PrintSettings) -> Vec<Segment> {
        if !settings.crop_marks {
            return Vec::new();
        }
        let offset = settings.crop_offset_mm;
        let length = settings.crop_length_mm;
        let mut marks = Vec::with_capacity(8);

        for &corner_x in &[card.x, card.right()] {
            for &corner_y in &[card.y, card.top()] {
                let horizontal_out = if corner_x == card.x { -1.0 } else { 1.0 };
                let vertical_out = if corner_y == card.y { -1.0 } else { 1.0 };

                marks.push(Segment {
                    x1: corner_x + horizontal_out * offset,
                    y1: corner_y,
                    x2: corner_x + horizontal_out * (offset + length),
                    y2: corner_y,
                });
                marks.push(Segment {
                    x1: corner_x,
                    y1: corner_y + vertical_out * offset,
                    x2: corner_x,
                    y2: corner_y + vertical_out * (offset + length),
                });
            }
        }
        marks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_fit_an_a4_sheet() {
        let layout = PageLayout::compute(&PrintSettings::default()).unwrap();
        for index in 0..CARDS_PER_PAGE {
            let cell = layout.cell_rect(index);
            assert!(cell.x >= 0.0 && cell.right() <= PAGE_WIDTH_MM);
            assert!(cell.y >= 0.0 && cell.top() <= PAGE_HEIGHT_MM);
        }
    }

    #[test]
    fn oversized_bleed_is_a_configuration_error() {
        let settings = PrintSettings {
            bleed_mm: 4.0,
            ..Default::default()
        };
        let err = PageLayout::compute(&settings).unwrap_err();
        assert!(matches!(err, SheetError::Layout { .. }));
    }

    #[test]
    fn gap_is_zero_without_crop_marks() {
        let settings = PrintSettings {
            crop_marks: false,
            ..Default::default()
        };
        let layout = PageLayout::compute(&settings).unwrap();
        assert_eq!(layout.gap, 0.0);

        let left = layout.cell_rect(0);
        let mid = layout.cell_rect(1);
        assert!((mid.x - left.right()).abs() < 1e-9);
    }

    #[test]
    fn block_is_centered_on_the_page() {
        let layout = PageLayout::compute(&PrintSettings::default()).unwrap();
        let first = layout.cell_rect(0);
        let last = layout.cell_rect(CARDS_PER_PAGE - 1);
        let left_margin = first.x;
        let right_margin = PAGE_WIDTH_MM - last.right();
        assert!((left_margin - right_margin).abs() < 1e-9);
    }

    #[test]
    fn crop_marks_never_touch_the_card_box() {
        let settings = PrintSettings::default();
        let layout = PageLayout::compute(&settings).unwrap();
        for index in 0..CARDS_PER_PAGE {
            let card = layout.card_rect(index);
            let marks = layout.crop_marks(&card, &settings);
            assert_eq!(marks.len(), 8);
            for mark in &marks {
                assert!(
                    !mark.bounding_box().overlaps(&card),
                    "mark {:?} overlaps card {:?}",
                    mark,
                    card
                );
            }
        }
    }

    #[test]
    fn disabling_marks_yields_no_segments() {
        let settings = PrintSettings {
            crop_marks: false,
            ..Default::default()
        };
        let layout = PageLayout::compute(&settings).unwrap();
        let card = layout.card_rect(0);
        assert!(layout.crop_marks(&card, &settings).is_empty());
    }

    #[test]
    fn card_rect_sits_inside_its_cell_by_the_bleed() {
        let layout = PageLayout::compute(&PrintSettings::default()).unwrap();
        let cell = layout.cell_rect(4);
        let card = layout.card_rect(4);
        assert!((card.x - cell.x - layout.bleed).abs() < 1e-9);
        assert!((cell.right() - card.right() - layout.bleed).abs() < 1e-9);
        assert_eq!(card.w, CARD_WIDTH_MM);
        assert_eq!(card.h, CARD_HEIGHT_MM);
    }
}
