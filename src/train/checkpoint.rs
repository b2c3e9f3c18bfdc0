use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::metadata::ModelMetadata;
use crate::network::network::Network;

pub const CHECKPOINT_FILE: &str = "model_best.json";

/// Criterion under which a checkpoint was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[value(name = "best_loss")]
    BestLoss,
    #[value(name = "best_acc")]
    BestAcc,
}

impl Selection {
    pub fn as_str(self) -> &'static str {
        match self {
            Selection::BestLoss => "best_loss",
            Selection::BestAcc => "best_acc",
        }
    }
}

/// Weights plus the metadata needed to reuse them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 0-based epoch the weights come from.
    pub epoch: usize,
    pub selection: Option<Selection>,
    /// Validation loss or accuracy that earned the selection.
    pub value: f64,
    #[serde(default)]
    pub metadata: ModelMetadata,
    pub network: Network,
}

impl Checkpoint {
    /// Writes `<dir>/model_best.json`, superseding any previous file
    /// through an atomic rename.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(CHECKPOINT_FILE);
        let tmp = dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        {
            let writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(writer, self)?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Reads `<dir>/model_best.json`, or `dir` itself when it is a file.
    pub fn load(dir: impl AsRef<Path>) -> Result<Checkpoint> {
        let dir = dir.as_ref();
        let path = if dir.is_file() { dir.to_path_buf() } else { dir.join(CHECKPOINT_FILE) };
        let reader = std::io::BufReader::new(fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Loads the network stored under `dir` together with its epoch.
pub fn load_model(dir: impl AsRef<Path>) -> Result<(Network, usize)> {
    let checkpoint = Checkpoint::load(dir)?;
    Ok((checkpoint.network, checkpoint.epoch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::network::spec::{LayerSpec, NetworkSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn save_supersedes_without_leaving_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let network = NetworkSpec {
            input_size: 2,
            stages: vec![],
            classifier: vec![LayerSpec::new(2, ActivationFunction::Softmax)],
        }
        .build(&mut StdRng::seed_from_u64(0));

        for epoch in 0..2 {
            Checkpoint {
                epoch,
                selection: Some(Selection::BestLoss),
                value: 1.0 / (epoch + 1) as f64,
                metadata: ModelMetadata::default(),
                network: network.clone(),
            }
            .save(dir.path())
            .unwrap();
        }

        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from(CHECKPOINT_FILE)]);
        let (_, epoch) = load_model(dir.path()).unwrap();
        assert_eq!(epoch, 1);
    }
}
