//! Reading and writing rasters and tables

mod geotiff;
mod table;

pub use geotiff::{read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer};
pub use table::{read_json, read_records, write_json, write_records, CovariateTable};
