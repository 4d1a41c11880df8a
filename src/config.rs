//! Resolved settings for one pipeline run.

use crate::dimensions::KeyOrder;
use crate::load::LoadOptions;
use crate::services::warehouse::DatasetRef;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trip CSV, optionally gzip-compressed.
    pub input: PathBuf,
    pub dataset: DatasetRef,
    pub load: LoadOptions,
    pub key_order: KeyOrder,
}
