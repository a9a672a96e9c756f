pub mod config;
pub mod error;
pub mod evaluate;
pub mod features;
pub mod indices;
pub mod io;
pub mod kmeans;
pub mod labels;
pub mod loader;
mod maybe_rayon;
pub mod pipeline;
pub mod raster;
pub mod region;

pub use config::{PipelineConfig, RegionConfig};
pub use error::{LandcoverError, Result};
pub use evaluate::{cluster_statistics, ClusterStat, ClusterStatistics};
pub use features::{build_feature_stack, sample_pixels, valid_pixel_mask, Sample, SamplingConfig};
pub use indices::{compute_indices, IndexSpec};
pub use kmeans::{assign_raster, train, ClusterModel, InitStrategy, KMeansConfig, TrainedModel, TrainingReport, TrainingWarning};
pub use labels::{LabelEntry, LabelMapping, LabelMask, PointProbe, ReferencePoint};
pub use loader::{load_composite, median_composite, AcquisitionFilter, SensorSource};
pub use pipeline::{run, run_on_inputs, write_outputs, PipelineResult};
pub use raster::{ClassRaster, GeoTransform, Raster};
pub use region::{PropertyFilter, RegionOfInterest};
