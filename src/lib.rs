pub mod data;

pub use data::nyudv2::{
    ClassMap, DatasetError, NyudConfig, NyudDataset, NyudItem, Split, CLASSES, IGNORE_LABEL,
    NUM_CLASSES,
};
pub use data::{NyudBatch, NyudBatcher};
