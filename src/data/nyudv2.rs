use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::config::Config;
use burn::data::dataset::Dataset;
use image::{DynamicImage, GrayImage};
use itertools::Itertools;
use thiserror::Error;

use super::transform::{self, Sample};

pub const NUM_CLASSES: usize = 40;

/// Loss-ignore sentinel, preserved through the remap.
pub const IGNORE_LABEL: u8 = 255;

/// Dense index every void raw label collapses to.
pub const BACKGROUND_INDEX: u8 = 0;

/// Human-readable names of the 40 valid classes, in dense-index order
/// starting at 1, with the void/background class last. Reporting only.
pub const CLASSES: [&str; NUM_CLASSES + 1] = [
    "wall",
    "floor",
    "cabinet",
    "bed",
    "chair",
    "sofa",
    "table",
    "door",
    "window",
    "bookshelf",
    "picture",
    "counter",
    "blinds",
    "desk",
    "shelves",
    "curtain",
    "dresser",
    "pillow",
    "mirror",
    "floor mat",
    "clothes",
    "ceiling",
    "books",
    "refridgerator",
    "television",
    "paper",
    "towel",
    "shower curtain",
    "box",
    "whiteboard",
    "person",
    "nightstand",
    "toilet",
    "sink",
    "lamp",
    "bathtub",
    "bag",
    "other structure",
    "other furniture",
    "other prop",
    "void",
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("reading directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no .jpg files for split `{split}` in {}", path.display())]
    EmptySplit { split: Split, path: PathBuf },
    #[error("unknown split `{0}`, expected one of train/val/test")]
    UnknownSplit(String),
    #[error("decoding {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("sample index {index} out of range, dataset has {len} samples")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(DatasetError::UnknownSplit(other.to_string())),
        }
    }
}

/// Raw-label to dense-class-index table, total over the 8-bit label range.
#[derive(Debug, Clone)]
pub struct ClassMap {
    table: [u8; 256],
}

impl ClassMap {
    /// `valid_classes[i]` maps to dense index `i + 1`, `ignore_label` is
    /// preserved unchanged, and every other raw value collapses to
    /// [`BACKGROUND_INDEX`]. The valid list and the implied void set are
    /// disjoint by construction, so the table covers every raw value
    /// exactly once.
    pub fn new(valid_classes: &[u8], ignore_label: u8) -> Self {
        debug_assert!(valid_classes.len() <= u8::MAX as usize);

        let mut table = [BACKGROUND_INDEX; 256];
        for (dense, &raw) in (1u8..).zip(valid_classes) {
            table[raw as usize] = dense;
        }
        table[ignore_label as usize] = ignore_label;

        Self { table }
    }

    /// The NYUDv2 convention: raw 1..=40 keep their value, 255 stays the
    /// loss-ignore sentinel, and the void range (41..=894 in the original
    /// labeling, i.e. everything else once stored in 8-bit rasters)
    /// collapses to 0. Identity on the valid range makes the remap
    /// idempotent; a map built from an arbitrary id list need not be.
    pub fn nyudv2() -> Self {
        let valid = (1..=NUM_CLASSES as u8).collect_vec();
        let map = Self::new(&valid, IGNORE_LABEL);
        debug_assert!(map.table.iter().all(|&d| map.table[d as usize] == d));
        map
    }

    pub fn remap(&self, raw: u8) -> u8 {
        self.table[raw as usize]
    }

    /// Rewrites a raw label raster into dense class indices in place.
    pub fn encode(&self, mask: &mut GrayImage) {
        for px in mask.pixels_mut() {
            px[0] = self.table[px[0] as usize];
        }
    }
}

#[derive(Config, Debug)]
pub struct NyudConfig {
    /// Short-side reference for the random rescale of the training pipeline.
    #[config(default = 513)]
    pub base_size: u32,
    /// Output spatial size of every pipeline.
    #[config(default = 513)]
    pub crop_size: u32,
}

/// One fully preprocessed sample, raw buffers out per burn convention; the
/// batcher owns tensor creation and device placement.
#[derive(Debug, Clone)]
pub struct NyudItem {
    /// H x W x C, normalized.
    pub image: Vec<f32>,
    /// H x W dense class indices.
    pub label: Vec<i64>,
    pub height: usize,
    pub width: usize,
}

/// NYU Depth v2 segmentation dataset over the on-disk layout
/// `root/<split>/image/*.jpg` + `root/<split>/gtFine/<stem>.png`.
///
/// The file index, class map and config are fixed at construction, so the
/// dataset is safe to read from multiple data-loader workers at once.
#[derive(Debug)]
pub struct NyudDataset {
    images: Vec<PathBuf>,
    labels_dir: PathBuf,
    split: Split,
    class_map: ClassMap,
    config: NyudConfig,
}

impl NyudDataset {
    pub fn train(root: impl AsRef<Path>, config: NyudConfig) -> Result<Self, DatasetError> {
        Self::new(root, Split::Train, config)
    }

    pub fn val(root: impl AsRef<Path>, config: NyudConfig) -> Result<Self, DatasetError> {
        Self::new(root, Split::Val, config)
    }

    pub fn test(root: impl AsRef<Path>, config: NyudConfig) -> Result<Self, DatasetError> {
        Self::new(root, Split::Test, config)
    }

    pub fn new(
        root: impl AsRef<Path>,
        split: Split,
        config: NyudConfig,
    ) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        let images_dir = root.join(split.as_str()).join("image");
        let labels_dir = root.join(split.as_str()).join("gtFine");

        let images = scan_dir(&images_dir, ".jpg")?;
        if images.is_empty() {
            return Err(DatasetError::EmptySplit {
                split,
                path: images_dir,
            });
        }
        log::info!(
            "found {} {split} images in {}",
            images.len(),
            images_dir.display()
        );

        Ok(Self {
            images,
            labels_dir,
            split,
            class_map: ClassMap::nyudv2(),
            config,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn class_map(&self) -> &ClassMap {
        &self.class_map
    }

    /// Loads, remaps and preprocesses one sample. Any missing or corrupt
    /// file is an error naming the failing path; there is no skip or
    /// default substitution.
    pub fn load(&self, index: usize) -> Result<NyudItem, DatasetError> {
        let image_path = self
            .images
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.images.len(),
            })?;
        let label_path = derive_label_path(&self.labels_dir, image_path);

        let image = open_decoded(image_path)?.to_rgb8();
        let mut mask = open_decoded(&label_path)?.to_luma8();
        self.class_map.encode(&mut mask);

        let sample = Sample { image, mask };
        let sample = match self.split {
            Split::Train => transform::random_scale_crop(
                sample,
                self.config.base_size,
                self.config.crop_size,
                IGNORE_LABEL,
                &mut rand::thread_rng(),
            ),
            Split::Val | Split::Test => transform::fixed_resize(sample, self.config.crop_size),
        };

        Ok(transform::to_item(sample, &transform::IMAGENET))
    }
}

impl Dataset<NyudItem> for NyudDataset {
    fn get(&self, index: usize) -> Option<NyudItem> {
        if index >= self.images.len() {
            return None;
        }
        // The trait cannot carry an error and a silent skip would shrink the
        // epoch, so a broken sample aborts it.
        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => panic!("loading sample {index}: {err}"),
        }
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Shallow scan of `dir` for entries whose name ends with `suffix`, in
/// directory-listing order. Nested layouts are deliberately not walked.
fn scan_dir(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, DatasetError> {
    let read_err = |source| DatasetError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.to_string_lossy().ends_with(suffix) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// `.../image/foo.jpg` -> `<labels_dir>/foo.png`, taking the final path
/// component regardless of which separator convention the index was built
/// with.
fn derive_label_path(labels_dir: &Path, image_path: &Path) -> PathBuf {
    let name = image_path.to_string_lossy();
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    labels_dir.join(format!("{stem}.png"))
}

fn open_decoded(path: &Path) -> Result<DynamicImage, DatasetError> {
    image::open(path).map_err(|source| DatasetError::Decode {
        path: path.to_path_buf(),
        source,
    })
}
