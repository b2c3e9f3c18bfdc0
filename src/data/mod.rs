pub mod dataset;
pub mod loader;
pub mod sampler;
pub mod split;
pub mod table;
pub mod volume;

pub use dataset::{Dataset, InMemoryDataset, MriDataset, PatchDataset, PatchStackDataset, Sample};
pub use loader::{DataLoader, Order};
pub use sampler::SamplerKind;
pub use split::{load_test_rows, split_folds, DatasetSplit};
pub use table::{load_table, read_rows, write_table, SampleRow};
pub use volume::{Preprocessing, Volume};
