use std::path::{Path, PathBuf};

/// Rendered pages discovered in a cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSet {
    /// Zero-padding width used by the rasterizer (0 when no pages were found)
    pub pad_width: usize,

    /// Page image paths in page order, index 0 is page 1
    pub pages: Vec<PathBuf>,
}

impl PageSet {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Discovers the rendered page files for one document
pub trait PageEnumerator: Send + Sync {
    /// File name prefix the rasterizer must write pages under
    fn output_prefix(&self) -> &str;

    fn enumerate(&self, dir: &Path) -> PageSet;
}

/// Looks up `<prefix>-<index>.png` with zero-padded indices.
///
/// pdftoppm pads page numbers just wide enough for the page count (`-1`,
/// `-01`, `-001`, ...) and never says which width it chose, so the width is
/// found by probing for page 1 at increasing widths.
#[derive(Debug, Clone)]
pub struct PaddedIndexScan {
    prefix: String,
    max_width: usize,
}

impl PaddedIndexScan {
    pub const DEFAULT_PREFIX: &'static str = "png_gen";
    pub const DEFAULT_MAX_WIDTH: usize = 10;

    pub fn new(prefix: impl Into<String>, max_width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            max_width,
        }
    }

    /// Path of page `index` rendered with the given padding width
    pub fn page_path(&self, dir: &Path, index: usize, width: usize) -> PathBuf {
        dir.join(format!("{}-{:0width$}.png", self.prefix, index, width = width))
    }

    fn discover_width(&self, dir: &Path) -> Option<usize> {
        (1..=self.max_width).find(|&width| self.page_path(dir, 1, width).is_file())
    }
}

impl Default for PaddedIndexScan {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX, Self::DEFAULT_MAX_WIDTH)
    }
}

impl PageEnumerator for PaddedIndexScan {
    fn output_prefix(&self) -> &str {
        &self.prefix
    }

    fn enumerate(&self, dir: &Path) -> PageSet {
        let Some(pad_width) = self.discover_width(dir) else {
            return PageSet::default();
        };

        let pages = (1..)
            .map(|index| self.page_path(dir, index, pad_width))
            .take_while(|path| path.is_file())
            .collect();

        PageSet { pad_width, pages }
    }
}
