use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layers::dense::Layer;
use crate::layout::RunLayout;
use crate::network::network::Network;
use crate::train::checkpoint::Checkpoint;
use crate::transfer::autoencoder::AutoencoderCheckpoint;

/// What a pretrained weight file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    Autoencoder,
    FullNetwork,
}

/// Destination layers that received weights and those left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub copied: Vec<usize>,
    pub skipped: Vec<usize>,
}

/// Classifies a checkpoint by its structure: a non-empty `decoder` group
/// means autoencoder weights.
pub fn detect_kind(path: impl AsRef<Path>) -> Result<CheckpointKind> {
    let path = path.as_ref();
    let value: Value = serde_json::from_reader(BufReader::new(fs::File::open(path)?))?;
    let has_decoder = value
        .get("decoder")
        .and_then(Value::as_array)
        .map_or(false, |layers| !layers.is_empty());
    if has_decoder {
        Ok(CheckpointKind::Autoencoder)
    } else if value.get("network").is_some() {
        Ok(CheckpointKind::FullNetwork)
    } else {
        Err(Error::Data(format!("{} is neither an autoencoder nor a network checkpoint", path.display())))
    }
}

fn copy_layer(dest: &mut Layer, src: &Layer) {
    dest.weights = src.weights.clone();
    dest.biases = src.biases.clone();
}

/// Copies encoder stages into the feature stages of `network`, shifted by
/// `difference`: destination stage `i` receives encoder stage
/// `i - difference`. Stages below `difference`, and those past the end of
/// the encoder, keep their initial weights.
pub fn apply_autoencoder_weights(network: &mut Network, encoder: &[Layer], difference: usize) -> Result<TransferReport> {
    let mut report = TransferReport::default();
    for (i, dest) in network.stages_mut().iter_mut().enumerate() {
        let src = match i.checked_sub(difference).and_then(|j| encoder.get(j)) {
            Some(src) => src,
            None => {
                report.skipped.push(i);
                continue;
            }
        };
        if !dest.same_shape(src) {
            return Err(Error::Transfer(format!(
                "stage {} expects {}x{} weights, encoder stage {} has {}x{}",
                i,
                dest.weights.rows,
                dest.weights.cols,
                i - difference,
                src.weights.rows,
                src.weights.cols
            )));
        }
        copy_layer(dest, src);
        report.copied.push(i);
    }
    Ok(report)
}

/// Copies every layer of `source` whose shape matches the layer at the same
/// position in `network`.
pub fn apply_pretrained_network_weights(network: &mut Network, source: &Network) -> TransferReport {
    let mut report = TransferReport::default();
    for (i, dest) in network.layers.iter_mut().enumerate() {
        match source.layers.get(i) {
            Some(src) if dest.same_shape(src) => {
                copy_layer(dest, src);
                report.copied.push(i);
            }
            _ => report.skipped.push(i),
        }
    }
    report
}

/// Where the initial weights of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    /// Existing weight file.
    Load(PathBuf),
    /// Greedy autoencoder pretraining on the given diagnoses.
    Pretrain { diagnoses: Vec<String> },
}

/// An existing path is loaded; anything else asks for fresh pretraining,
/// which cannot start without a diagnosis list.
pub fn plan_transfer(path: &Path, diagnoses: Option<&[String]>) -> Result<TransferPlan> {
    if path.exists() {
        return Ok(TransferPlan::Load(path.to_path_buf()));
    }
    match diagnoses {
        Some(d) if !d.is_empty() => Ok(TransferPlan::Pretrain { diagnoses: d.to_vec() }),
        _ => Err(Error::MissingTransferDiagnoses),
    }
}

/// Loads `path`, transplants its weights into `network` and keeps a copy
/// of the file under the run's `pretrained` directory.
pub fn apply_transfer(
    network: &mut Network,
    path: &Path,
    difference: usize,
    layout: &RunLayout,
) -> Result<TransferReport> {
    let kind = detect_kind(path)?;
    let report = match kind {
        CheckpointKind::Autoencoder => {
            let checkpoint = AutoencoderCheckpoint::load(path)?;
            apply_autoencoder_weights(network, &checkpoint.encoder, difference)?
        }
        CheckpointKind::FullNetwork => {
            if difference > 0 {
                warn!("transfer_difference only applies to autoencoder weights; ignoring {}", difference);
            }
            let checkpoint = Checkpoint::load(path)?;
            apply_pretrained_network_weights(network, &checkpoint.network)
        }
    };

    if report.copied.is_empty() {
        warn!("no layer of {} matched the network", path.display());
    }
    info!(
        "transferred {:?} weights from {}: layers {:?} copied, {:?} kept",
        kind,
        path.display(),
        report.copied,
        report.skipped
    );

    let dir = layout.pretrained_dir();
    fs::create_dir_all(&dir)?;
    let name = path.file_name().map_or_else(|| "model_best.json".into(), |n| n.to_os_string());
    fs::copy(path, dir.join(name))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::network::metadata::ModelMetadata;
    use crate::network::spec::{LayerSpec, NetworkSpec};
    use crate::transfer::autoencoder::Autoencoder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn five_stages(seed: u64) -> Network {
        NetworkSpec {
            input_size: 4,
            stages: (0..5).map(|_| LayerSpec::new(4, ActivationFunction::ReLU)).collect(),
            classifier: vec![LayerSpec::new(2, ActivationFunction::Softmax)],
        }
        .build(&mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn difference_two_copies_stages_two_to_four_only() {
        let mut dest = five_stages(1);
        let before = dest.clone();
        let source = five_stages(2);

        let report = apply_autoencoder_weights(&mut dest, source.stages(), 2).unwrap();
        assert_eq!(report.copied, vec![2, 3, 4]);
        assert_eq!(report.skipped, vec![0, 1]);

        for i in 0..2 {
            assert_eq!(dest.layers[i].weights, before.layers[i].weights);
        }
        for i in 2..5 {
            assert_eq!(dest.layers[i].weights, source.layers[i - 2].weights);
            assert_eq!(dest.layers[i].biases, source.layers[i - 2].biases);
        }
        // classifier head untouched
        assert_eq!(dest.layers[5].weights, before.layers[5].weights);
    }

    #[test]
    fn shape_mismatch_is_a_transfer_error() {
        let mut dest = five_stages(1);
        let other = NetworkSpec {
            input_size: 7,
            stages: vec![LayerSpec::new(4, ActivationFunction::ReLU)],
            classifier: vec![],
        }
        .build(&mut StdRng::seed_from_u64(3));
        assert!(matches!(
            apply_autoencoder_weights(&mut dest, other.stages(), 0),
            Err(Error::Transfer(_))
        ));
    }

    #[test]
    fn full_network_copy_skips_mismatched_layers() {
        let mut dest = five_stages(1);
        let source = NetworkSpec {
            input_size: 4,
            stages: (0..5).map(|_| LayerSpec::new(4, ActivationFunction::ReLU)).collect(),
            classifier: vec![LayerSpec::new(3, ActivationFunction::Softmax)],
        }
        .build(&mut StdRng::seed_from_u64(4));
        let report = apply_pretrained_network_weights(&mut dest, &source);
        assert_eq!(report.copied, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.skipped, vec![5]);
    }

    #[test]
    fn missing_path_needs_diagnoses() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nothing.json");
        assert!(matches!(plan_transfer(&missing, None), Err(Error::MissingTransferDiagnoses)));
        let empty: Vec<String> = Vec::new();
        assert!(matches!(plan_transfer(&missing, Some(empty.as_slice())), Err(Error::MissingTransferDiagnoses)));
        let diagnoses = vec!["AD".to_string(), "CN".to_string()];
        assert_eq!(
            plan_transfer(&missing, Some(diagnoses.as_slice())).unwrap(),
            TransferPlan::Pretrain { diagnoses: diagnoses.clone() }
        );
    }

    #[test]
    fn kind_is_detected_from_structure_and_the_source_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let network = five_stages(6);

        let ae_dir = dir.path().join("ae");
        let ae_path = AutoencoderCheckpoint::new(0, 0.1, Autoencoder::from_network(&network, false, &mut rng))
            .save(&ae_dir)
            .unwrap();
        assert_eq!(detect_kind(&ae_path).unwrap(), CheckpointKind::Autoencoder);

        let net_path = Checkpoint {
            epoch: 3,
            selection: None,
            value: 0.0,
            metadata: ModelMetadata::default(),
            network: network.clone(),
        }
        .save(dir.path().join("net"))
        .unwrap();
        assert_eq!(detect_kind(&net_path).unwrap(), CheckpointKind::FullNetwork);

        let layout = RunLayout::subject(dir.path().join("out"), 0);
        let mut dest = five_stages(7);
        let report = apply_transfer(&mut dest, &ae_path, 0, &layout).unwrap();
        assert_eq!(report.copied, vec![0, 1, 2, 3, 4]);
        assert!(layout.pretrained_dir().join("model_best.json").is_file());
    }
}
