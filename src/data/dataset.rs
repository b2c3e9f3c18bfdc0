use std::path::PathBuf;

use crate::data::table::{label_index, SampleRow};
use crate::data::volume::{min_max_normalize, Preprocessing, Volume};
use crate::error::{Error, Result};

/// One network input with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub participant_id: String,
    pub session_id: String,
    pub input: Vec<f64>,
    pub label: usize,
}

/// Indexed access to samples. Implementations read from disk lazily and must
/// be shareable across loader workers.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label of sample `index` without loading its input.
    fn label(&self, index: usize) -> usize;

    fn get(&self, index: usize) -> Result<Sample>;

    fn labels(&self) -> Vec<usize> {
        (0..self.len()).map(|i| self.label(i)).collect()
    }
}

fn resolve_labels(rows: &[SampleRow], diagnoses: &[String]) -> Result<Vec<usize>> {
    rows.iter()
        .map(|row| {
            label_index(diagnoses, &row.diagnosis).ok_or_else(|| {
                Error::Config(format!(
                    "{} {} has diagnosis {} outside {:?}",
                    row.participant_id, row.session_id, row.diagnosis, diagnoses
                ))
            })
        })
        .collect()
}

/// Whole preprocessed volumes.
pub struct MriDataset {
    caps_dir: PathBuf,
    preprocessing: Preprocessing,
    rows: Vec<SampleRow>,
    labels: Vec<usize>,
    normalize: bool,
}

impl MriDataset {
    pub fn new(
        caps_dir: impl Into<PathBuf>,
        rows: Vec<SampleRow>,
        diagnoses: &[String],
        preprocessing: Preprocessing,
        normalize: bool,
    ) -> Result<MriDataset> {
        let labels = resolve_labels(&rows, diagnoses)?;
        Ok(MriDataset { caps_dir: caps_dir.into(), preprocessing, rows, labels, normalize })
    }

    pub fn image_path(&self, index: usize) -> PathBuf {
        let row = &self.rows[index];
        self.preprocessing.image_path(&self.caps_dir, &row.participant_id, &row.session_id)
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    fn patch_sample(&self, index: usize, patch_size: usize, stride: usize, patch_index: usize) -> Result<Sample> {
        let row = &self.rows[index];
        let volume = Volume::read(self.image_path(index))?;
        let mut input = volume.patch(patch_size, stride, patch_index)?;
        if self.normalize {
            min_max_normalize(&mut input);
        }
        Ok(Sample {
            participant_id: row.participant_id.clone(),
            session_id: row.session_id.clone(),
            input,
            label: self.labels[index],
        })
    }
}

impl Dataset for MriDataset {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn label(&self, index: usize) -> usize {
        self.labels[index]
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let row = &self.rows[index];
        let mut input = Volume::read(self.image_path(index))?.data;
        if self.normalize {
            min_max_normalize(&mut input);
        }
        Ok(Sample {
            participant_id: row.participant_id.clone(),
            session_id: row.session_id.clone(),
            input,
            label: self.labels[index],
        })
    }
}

/// Patch `patch_index` of every row's volume.
pub struct PatchDataset {
    images: MriDataset,
    patch_size: usize,
    stride: usize,
    patch_index: usize,
}

impl PatchDataset {
    pub fn new(images: MriDataset, patch_size: usize, stride: usize, patch_index: usize) -> PatchDataset {
        PatchDataset { images, patch_size, stride, patch_index }
    }

    pub fn patch_index(&self) -> usize {
        self.patch_index
    }
}

impl Dataset for PatchDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn label(&self, index: usize) -> usize {
        self.images.label(index)
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.images.patch_sample(index, self.patch_size, self.stride, self.patch_index)
    }
}

/// Patches `0..patches_per_image` of every row, image-major. Feeds
/// autoencoder pretraining, which is shared by all patch classifiers.
pub struct PatchStackDataset {
    images: MriDataset,
    patch_size: usize,
    stride: usize,
    patches_per_image: usize,
}

impl PatchStackDataset {
    pub fn new(images: MriDataset, patch_size: usize, stride: usize, patches_per_image: usize) -> PatchStackDataset {
        PatchStackDataset { images, patch_size, stride, patches_per_image }
    }
}

impl Dataset for PatchStackDataset {
    fn len(&self) -> usize {
        self.images.len() * self.patches_per_image
    }

    fn label(&self, index: usize) -> usize {
        self.images.label(index / self.patches_per_image)
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.images.patch_sample(
            index / self.patches_per_image,
            self.patch_size,
            self.stride,
            index % self.patches_per_image,
        )
    }
}

/// Samples already held in memory.
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> InMemoryDataset {
        InMemoryDataset { samples }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn label(&self, index: usize) -> usize {
        self.samples[index].label
    }

    fn get(&self, index: usize) -> Result<Sample> {
        Ok(self.samples[index].clone())
    }
}
