use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use super::hasher::ContentHash;
use super::pixels::PixelGrid;
use crate::error::{PdfDiffError, Result};

/// Weight of the original channel when tinting; the highlight gets the rest
pub const BLEND_ALPHA: f64 = 0.6;

/// Target tint for changed rows, parsed once per job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightColor {
    r: f64,
    g: f64,
    b: f64,
}

impl HighlightColor {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f64,
            g: g as f64,
            b: b as f64,
        }
    }

    fn blend(channel: u8, target: f64) -> u8 {
        (channel as f64 * BLEND_ALPHA + target * (1.0 - BLEND_ALPHA))
            .round()
            .clamp(0.0, 255.0) as u8
    }

    /// Tint one sample toward this color, leaving alpha untouched
    pub fn apply(&self, pixel: &mut Rgba<u8>) {
        let [r, g, b, a] = pixel.0;
        *pixel = Rgba([
            Self::blend(r, self.r),
            Self::blend(g, self.g),
            Self::blend(b, self.b),
            a,
        ]);
    }
}

impl Default for HighlightColor {
    fn default() -> Self {
        Self::from_rgb(0xff, 0x20, 0x10)
    }
}

impl FromStr for HighlightColor {
    type Err = PdfDiffError;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PdfDiffError::InvalidColor(s.to_string()));
        }
        let value =
            u32::from_str_radix(hex, 16).map_err(|_| PdfDiffError::InvalidColor(s.to_string()))?;
        Ok(Self::from_rgb(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ))
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}",
            self.r as u8, self.g as u8, self.b as u8
        )
    }
}

/// Page extents that disagree between the two documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionMismatch {
    pub first: (u32, u32),
    pub second: (u32, u32),
}

impl fmt::Display for DimensionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} vs {}x{}",
            self.first.0, self.first.1, self.second.0, self.second.1
        )
    }
}

/// Result of diffing two decoded pages
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// The second page with changed rows tinted
    pub grid: PixelGrid,
    pub changed_rows: u32,
    pub mismatch: Option<DimensionMismatch>,
}

/// What happened to one page pair on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Byte-identical page images; the output is a copy of the second page
    Identical,
    Compared {
        changed_rows: u32,
        mismatch: Option<DimensionMismatch>,
    },
}

/// Tracks which samples of the output were already tinted during one diff
struct TintMask {
    width: u32,
    modified: Vec<bool>,
}

impl TintMask {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            modified: vec![false; width as usize * height as usize],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn is_modified(&self, x: u32, y: u32) -> bool {
        self.modified[self.index(x, y)]
    }

    /// Returns true when the sample had not been marked before
    fn mark(&mut self, x: u32, y: u32) -> bool {
        let index = self.index(x, y);
        !std::mem::replace(&mut self.modified[index], true)
    }
}

/// Compares page images and tints every row containing a difference
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    highlight: HighlightColor,
}

impl DiffEngine {
    pub fn new(highlight: HighlightColor) -> Self {
        Self { highlight }
    }

    /// Diff two grids over their overlapping extent.
    ///
    /// The output has the second grid's dimensions. A row is tinted in full
    /// as soon as any sample in it differs, and no sample is tinted twice.
    pub fn diff(&self, first: &PixelGrid, second: &PixelGrid) -> DiffOutcome {
        let mismatch = (first.dimensions() != second.dimensions()).then(|| DimensionMismatch {
            first: first.dimensions(),
            second: second.dimensions(),
        });

        let width = first.width().min(second.width());
        let height = first.height().min(second.height());

        let mut output = second.clone();
        let mut mask = TintMask::new(second.width(), second.height());
        let mut changed_rows = 0;

        for y in 0..height {
            for x in 0..width {
                if mask.is_modified(x, y) {
                    continue;
                }
                if first.pixel(x, y) != second.pixel(x, y) {
                    self.tint_row(&mut output, &mut mask, y);
                    changed_rows += 1;
                }
            }
        }

        DiffOutcome {
            grid: output,
            changed_rows,
            mismatch,
        }
    }

    fn tint_row(&self, grid: &mut PixelGrid, mask: &mut TintMask, y: u32) {
        for x in 0..grid.width() {
            if mask.mark(x, y) {
                self.highlight.apply(grid.pixel_mut(x, y));
            }
        }
    }

    /// Diff two page files and write the highlighted result to `output`
    pub fn diff_files(&self, first: &Path, second: &Path, output: &Path) -> Result<PageOutcome> {
        if ContentHash::of_file(first)? == ContentHash::of_file(second)? {
            debug!("Pages are byte-identical: {}", second.display());
            std::fs::copy(second, output)?;
            return Ok(PageOutcome::Identical);
        }

        let first_grid = PixelGrid::decode(first)?;
        let second_grid = PixelGrid::decode(second)?;
        let outcome = self.diff(&first_grid, &second_grid);

        if let Some(mismatch) = &outcome.mismatch {
            warn!(
                "Comparing pages with different dimensions ({}): {} and {}; only the overlap is compared",
                mismatch,
                first.display(),
                second.display()
            );
        }

        outcome.grid.encode(output)?;

        Ok(PageOutcome::Compared {
            changed_rows: outcome.changed_rows,
            mismatch: outcome.mismatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> PixelGrid {
        PixelGrid::from_image(image::RgbaImage::from_pixel(width, height, color))
    }

    fn expected_blend(pixel: Rgba<u8>, target: [f64; 3]) -> Rgba<u8> {
        let c = |v: u8, t: f64| (v as f64 * 0.6 + t * 0.4).round() as u8;
        Rgba([
            c(pixel[0], target[0]),
            c(pixel[1], target[1]),
            c(pixel[2], target[2]),
            pixel[3],
        ])
    }

    #[test]
    fn test_parse_highlight_color() {
        let color: HighlightColor = "ff2010".parse().unwrap();
        assert_eq!(color, HighlightColor::from_rgb(255, 32, 16));
        assert_eq!("#FF2010".parse::<HighlightColor>().unwrap(), color);
        assert_eq!(color.to_string(), "ff2010");
        assert_eq!(HighlightColor::default(), color);

        for bad in ["", "ff20", "ff20100", "gg2010", "+f2010"] {
            assert!(
                matches!(bad.parse::<HighlightColor>(), Err(PdfDiffError::InvalidColor(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_two_by_two_scenario() {
        let first = solid(2, 2, BLACK);
        let mut second = solid(2, 2, BLACK);
        *second.pixel_mut(0, 0) = WHITE;

        let engine = DiffEngine::new("ff2010".parse().unwrap());
        let outcome = engine.diff(&first, &second);

        assert_eq!(outcome.changed_rows, 1);
        assert!(outcome.mismatch.is_none());
        assert_eq!(outcome.grid.pixel(0, 0), Rgba([255, 166, 159, 255]));
        assert_eq!(outcome.grid.pixel(1, 0), Rgba([102, 13, 6, 255]));
        assert_eq!(outcome.grid.pixel(0, 1), BLACK);
        assert_eq!(outcome.grid.pixel(1, 1), BLACK);
    }

    #[test]
    fn test_blend_formula_keeps_alpha() {
        let first = solid(4, 1, Rgba([0, 0, 0, 0]));
        let mut second = solid(4, 1, Rgba([0, 0, 0, 0]));
        let samples = [
            Rgba([10, 200, 30, 40]),
            Rgba([128, 64, 32, 255]),
            Rgba([1, 2, 3, 4]),
            Rgba([250, 250, 250, 0]),
        ];
        for (x, sample) in samples.iter().enumerate() {
            *second.pixel_mut(x as u32, 0) = *sample;
        }

        let engine = DiffEngine::new(HighlightColor::from_rgb(0, 128, 255));
        let outcome = engine.diff(&first, &second);

        for (x, sample) in samples.iter().enumerate() {
            assert_eq!(
                outcome.grid.pixel(x as u32, 0),
                expected_blend(*sample, [0.0, 128.0, 255.0])
            );
        }
    }

    #[test]
    fn test_each_pixel_tinted_once() {
        let first = solid(5, 3, BLACK);
        let mut second = solid(5, 3, BLACK);
        for x in 0..5 {
            *second.pixel_mut(x, 1) = WHITE;
        }

        let engine = DiffEngine::default();
        let outcome = engine.diff(&first, &second);

        assert_eq!(outcome.changed_rows, 1);
        let once = expected_blend(WHITE, [255.0, 32.0, 16.0]);
        for x in 0..5 {
            assert_eq!(outcome.grid.pixel(x, 1), once);
            assert_eq!(outcome.grid.pixel(x, 0), BLACK);
            assert_eq!(outcome.grid.pixel(x, 2), BLACK);
        }
    }

    #[test]
    fn test_identical_grids_are_untouched() {
        let grid = solid(3, 3, Rgba([9, 8, 7, 255]));
        let outcome = DiffEngine::default().diff(&grid, &grid.clone());
        assert_eq!(outcome.changed_rows, 0);
        assert_eq!(outcome.grid, grid);
    }

    #[test]
    fn test_alpha_only_difference_counts() {
        let first = solid(1, 1, Rgba([0, 0, 0, 255]));
        let second = solid(1, 1, Rgba([0, 0, 0, 254]));
        let outcome = DiffEngine::default().diff(&first, &second);
        assert_eq!(outcome.changed_rows, 1);
        assert_eq!(outcome.grid.pixel(0, 0)[3], 254);
    }

    #[test]
    fn test_mismatched_dimensions_use_overlap() {
        let first = solid(10, 10, BLACK);
        let mut second = solid(10, 12, BLACK);
        *second.pixel_mut(5, 2) = WHITE;
        *second.pixel_mut(3, 11) = WHITE;

        let outcome = DiffEngine::default().diff(&first, &second);

        assert_eq!(
            outcome.mismatch,
            Some(DimensionMismatch {
                first: (10, 10),
                second: (10, 12),
            })
        );
        assert_eq!(outcome.grid.dimensions(), (10, 12));
        assert_eq!(outcome.changed_rows, 1);
        assert_ne!(outcome.grid.pixel(0, 2), BLACK);
        assert_eq!(outcome.grid.pixel(3, 11), WHITE);
        assert_eq!(outcome.grid.pixel(0, 11), BLACK);
    }

    #[test]
    fn test_wider_first_grid_is_clamped() {
        let first = solid(6, 2, WHITE);
        let second = solid(3, 2, WHITE);
        let outcome = DiffEngine::default().diff(&first, &second);
        assert!(outcome.mismatch.is_some());
        assert_eq!(outcome.changed_rows, 0);
        assert_eq!(outcome.grid, second);
    }

    #[test]
    fn test_identical_files_take_fast_path() {
        let temp = assert_fs::TempDir::new().unwrap();
        let a = temp.child("a.png");
        let b = temp.child("b.png");
        let out = temp.child("out.png");

        let mut grid = solid(4, 4, BLACK);
        *grid.pixel_mut(1, 1) = WHITE;
        grid.encode(a.path()).unwrap();
        grid.encode(b.path()).unwrap();

        let outcome = DiffEngine::default()
            .diff_files(a.path(), b.path(), out.path())
            .unwrap();

        assert_eq!(outcome, PageOutcome::Identical);
        assert_eq!(
            std::fs::read(out.path()).unwrap(),
            std::fs::read(b.path()).unwrap()
        );
    }

    #[test]
    fn test_changed_files_are_encoded() {
        let temp = assert_fs::TempDir::new().unwrap();
        let a = temp.child("a.png");
        let b = temp.child("b.png");
        let out = temp.child("out.png");

        solid(2, 2, BLACK).encode(a.path()).unwrap();
        let mut second = solid(2, 2, BLACK);
        *second.pixel_mut(1, 1) = WHITE;
        second.encode(b.path()).unwrap();

        let outcome = DiffEngine::default()
            .diff_files(a.path(), b.path(), out.path())
            .unwrap();

        assert_eq!(
            outcome,
            PageOutcome::Compared {
                changed_rows: 1,
                mismatch: None
            }
        );
        let written = PixelGrid::decode(out.path()).unwrap();
        assert_eq!(written.pixel(0, 0), BLACK);
        assert_eq!(written.pixel(1, 1), Rgba([255, 166, 159, 255]));
    }
}
