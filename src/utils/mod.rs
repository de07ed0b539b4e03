pub mod dates;
mod plotting;
pub mod polars_utils;
mod workbook;

pub use plotting::*;
pub use workbook::*;
