use std::fs;
use std::path::Path;

use image::GrayImage;

use crate::data::volume::{min_max_normalize, Volume};
use crate::error::{Error, Result};
use crate::transfer::autoencoder::Autoencoder;

fn save_middle_slice(volume: &Volume, path: &Path) -> Result<()> {
    let [_, h, w] = volume.dims;
    let mut slice = volume.middle_slice();
    min_max_normalize(&mut slice);
    let pixels: Vec<u8> = slice.iter().map(|v| (v * 255.0).round() as u8).collect();
    let image = GrayImage::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| Error::Data(format!("slice of {}x{} does not fit its buffer", h, w)))?;
    image.save(path)?;
    Ok(())
}

/// Writes the middle axial slice of `input` and of its reconstruction as
/// `input.png` and `output.png` under `dir`.
pub fn write_reconstruction(autoencoder: &Autoencoder, input: &[f64], dims: [usize; 3], dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let original = Volume::new(dims, input.to_vec())?;
    let reconstructed = Volume::new(dims, autoencoder.reconstruct(input))?;
    save_middle_slice(&original, &dir.join("input.png"))?;
    save_middle_slice(&reconstructed, &dir.join("output.png"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::network::spec::{LayerSpec, NetworkSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn writes_both_slices() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let network = NetworkSpec {
            input_size: 2 * 3 * 4,
            stages: vec![LayerSpec::new(5, ActivationFunction::ReLU)],
            classifier: vec![LayerSpec::new(2, ActivationFunction::Softmax)],
        }
        .build(&mut rng);
        let ae = Autoencoder::from_network(&network, true, &mut rng);
        let input: Vec<f64> = (0..24).map(|i| i as f64 / 24.0).collect();

        write_reconstruction(&ae, &input, [2, 3, 4], dir.path()).unwrap();
        let slice = image::open(dir.path().join("input.png")).unwrap().to_luma8();
        assert_eq!(slice.dimensions(), (4, 3));
        assert!(dir.path().join("output.png").is_file());
    }
}
