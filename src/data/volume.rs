//! Preprocessed image volumes and patch extraction.
//!
//! File layout (`.vol`):
//! - 4 bytes magic `CVOL`
//! - 3 × u32 little-endian dimensions `(d, h, w)`
//! - `d·h·w` × f32 little-endian voxels, `w` varying fastest

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"CVOL";
const HEADER_LEN: usize = 16;

/// Preprocessing pipeline whose outputs are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preprocessing {
    Linear,
    Mniskullstrip,
    Mni,
}

impl Preprocessing {
    /// `mniskullstrip` images live with the `mni` ones.
    pub fn normalized(self) -> Preprocessing {
        match self {
            Preprocessing::Mniskullstrip => Preprocessing::Mni,
            other => other,
        }
    }

    /// Location of a participant/session image under the CAPS root.
    pub fn image_path(self, caps_dir: &Path, participant: &str, session: &str) -> PathBuf {
        let session_dir = caps_dir.join("subjects").join(participant).join(session);
        match self.normalized() {
            Preprocessing::Linear => session_dir
                .join("deeplearning_prepare_data")
                .join("image_based")
                .join("t1_linear")
                .join(format!(
                    "{}_{}_T1w_space-MNI152NLin2009cSym_res-1x1x1_T1w.vol",
                    participant, session
                )),
            _ => session_dir
                .join("t1")
                .join("spm")
                .join("segmentation")
                .join("normalized_space")
                .join(format!("{}_{}_space-Ixi549Space_T1w.vol", participant, session)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub dims: [usize; 3],
    pub data: Vec<f64>,
}

impl Volume {
    pub fn new(dims: [usize; 3], data: Vec<f64>) -> Result<Volume> {
        if dims.iter().product::<usize>() != data.len() {
            return Err(Error::Data(format!(
                "volume {:?} needs {} voxels, got {}",
                dims,
                dims.iter().product::<usize>(),
                data.len()
            )));
        }
        Ok(Volume { dims, data })
    }

    /// Reads only the header of a volume file.
    pub fn read_dims(path: impl AsRef<Path>) -> Result<[usize; 3]> {
        let path = path.as_ref();
        let mut header = [0u8; HEADER_LEN];
        File::open(path)?.read_exact(&mut header)?;
        parse_header(&header, path)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Volume> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        if bytes.len() < HEADER_LEN {
            return Err(Error::Data(format!("{}: truncated header", path.display())));
        }
        let dims = parse_header(&bytes[..HEADER_LEN], path)?;
        let body = &bytes[HEADER_LEN..];
        if Some(body.len()) != body_len(dims) {
            return Err(Error::Data(format!(
                "{}: dimensions {:?} do not match {} bytes of voxels",
                path.display(),
                dims,
                body.len()
            )));
        }
        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect();
        Ok(Volume { dims, data })
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        for d in self.dims {
            out.write_all(&(d as u32).to_le_bytes())?;
        }
        for &x in &self.data {
            out.write_all(&(x as f32).to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }

    /// Number of patches of side `size` taken every `stride` voxels.
    pub fn patch_count(dims: [usize; 3], size: usize, stride: usize) -> usize {
        patch_grid(dims, size, stride).iter().product()
    }

    /// Cubic patch number `index`, flattened `w`-fastest.
    pub fn patch(&self, size: usize, stride: usize, index: usize) -> Result<Vec<f64>> {
        let grid = patch_grid(self.dims, size, stride);
        let total: usize = grid.iter().product();
        if index >= total {
            return Err(Error::Config(format!(
                "patch index {} out of range: volume {:?} holds {} patches of size {} stride {}",
                index, self.dims, total, size, stride
            )));
        }
        let z0 = (index / (grid[1] * grid[2])) * stride;
        let y0 = ((index / grid[2]) % grid[1]) * stride;
        let x0 = (index % grid[2]) * stride;

        let [_, h, w] = self.dims;
        let mut patch = Vec::with_capacity(size * size * size);
        for z in z0..z0 + size {
            for y in y0..y0 + size {
                let start = (z * h + y) * w + x0;
                patch.extend_from_slice(&self.data[start..start + size]);
            }
        }
        Ok(patch)
    }

    /// Middle slice along the first axis, as `(rows = h, cols = w)`.
    pub fn middle_slice(&self) -> Vec<f64> {
        let [d, h, w] = self.dims;
        let start = (d / 2) * h * w;
        self.data[start..start + h * w].to_vec()
    }
}

fn parse_header(header: &[u8], path: &Path) -> Result<[usize; 3]> {
    if &header[..4] != MAGIC {
        return Err(Error::Data(format!("{}: not a volume file", path.display())));
    }
    let dim = |i: usize| {
        let o = 4 + 4 * i;
        u32::from_le_bytes([header[o], header[o + 1], header[o + 2], header[o + 3]]) as usize
    };
    let dims = [dim(0), dim(1), dim(2)];
    body_len(dims).ok_or_else(|| Error::Data(format!("{}: dimensions {:?} are too large", path.display(), dims)))?;
    Ok(dims)
}

/// Bytes of voxel data behind a header, if that fits in memory at all.
fn body_len(dims: [usize; 3]) -> Option<usize> {
    dims.iter().try_fold(4usize, |acc, &d| acc.checked_mul(d))
}

fn patch_grid(dims: [usize; 3], size: usize, stride: usize) -> [usize; 3] {
    let per_axis = |dim: usize| {
        if size == 0 || stride == 0 || dim < size {
            0
        } else {
            (dim - size) / stride + 1
        }
    };
    [per_axis(dims[0]), per_axis(dims[1]), per_axis(dims[2])]
}

/// Rescales values to [0, 1]; a constant input becomes all zeros.
pub fn min_max_normalize(values: &mut [f64]) {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
    }
}
