pub mod geotiff;

pub use geotiff::{read_band, write_class_u16, write_class_u8, write_f32, DecodedBand};
