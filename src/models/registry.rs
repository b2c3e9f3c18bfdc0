use std::collections::BTreeMap;

use rand::Rng;
use tracing::warn;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::network::network::Network;
use crate::network::spec::{LayerSpec, NetworkSpec};

/// Where a model should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl Device {
    pub fn from_flag(gpu: bool) -> Device {
        if gpu { Device::Gpu } else { Device::Cpu }
    }
}

type Constructor = Box<dyn Fn(usize, usize) -> NetworkSpec + Send + Sync>;

/// Maps architecture names to constructors of `(input_size, n_classes)`.
pub struct Registry {
    entries: BTreeMap<&'static str, Constructor>,
}

fn relu(widths: &[usize]) -> Vec<LayerSpec> {
    widths.iter().map(|&w| LayerSpec::new(w, ActivationFunction::ReLU)).collect()
}

fn head(hidden: &[usize], n_classes: usize) -> Vec<LayerSpec> {
    let mut layers = relu(hidden);
    layers.push(LayerSpec::new(n_classes, ActivationFunction::Softmax));
    layers
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Registry { entries: BTreeMap::new() };
        registry.register("Conv_4_FC_3", |input_size, n_classes| NetworkSpec {
            input_size,
            stages: relu(&[128, 64, 32, 16]),
            classifier: head(&[16, 8], n_classes),
        });
        registry.register("Conv_5_FC_3", |input_size, n_classes| NetworkSpec {
            input_size,
            stages: relu(&[128, 64, 32, 16, 8]),
            classifier: head(&[16, 8], n_classes),
        });
        registry.register("Conv_5_FC_2", |input_size, n_classes| NetworkSpec {
            input_size,
            stages: relu(&[128, 64, 32, 16, 8]),
            classifier: head(&[8], n_classes),
        });
        registry.register("Test", |input_size, n_classes| NetworkSpec {
            input_size,
            stages: relu(&[8, 4]),
            classifier: head(&[], n_classes),
        });
        registry
    }
}

impl Registry {
    pub fn register<F>(&mut self, name: &'static str, constructor: F)
    where
        F: Fn(usize, usize) -> NetworkSpec + Send + Sync + 'static,
    {
        self.entries.insert(name, Box::new(constructor));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Fails with `UnknownModel` unless `name` is registered.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            Ok(())
        } else {
            Err(Error::UnknownModel(name.to_string()))
        }
    }

    pub fn spec(&self, name: &str, input_size: usize, n_classes: usize) -> Result<NetworkSpec> {
        let constructor = self.entries.get(name).ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        Ok(constructor(input_size, n_classes))
    }

    /// Builds a freshly initialised network.
    pub fn create<R: Rng + ?Sized>(
        &self,
        name: &str,
        input_size: usize,
        n_classes: usize,
        device: Device,
        rng: &mut R,
    ) -> Result<Network> {
        let spec = self.spec(name, input_size, n_classes)?;
        if device == Device::Gpu {
            warn!("no accelerator backend is available, {} runs on the CPU", name);
        }
        Ok(spec.build(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn unknown_name_is_rejected() {
        let registry = Registry::default();
        assert!(matches!(registry.validate("ResNet"), Err(Error::UnknownModel(_))));
        assert!(registry.validate("Conv_5_FC_3").is_ok());
    }

    #[test]
    fn stage_count_follows_the_name() {
        let registry = Registry::default();
        let mut rng = StdRng::seed_from_u64(0);
        let net = registry.create("Conv_5_FC_3", 27, 2, Device::Cpu, &mut rng).unwrap();
        assert_eq!(net.stage_count(), 5);
        assert_eq!(net.layers.len(), 8);
        assert_eq!(net.input_size(), 27);
        assert_eq!(net.output_size(), 2);
    }

    #[test]
    fn custom_constructors_can_be_registered() {
        let mut registry = Registry::default();
        registry.register("Tiny", |input_size, n_classes| NetworkSpec {
            input_size,
            stages: vec![],
            classifier: head(&[], n_classes),
        });
        assert!(registry.names().contains(&"Tiny"));
    }
}
