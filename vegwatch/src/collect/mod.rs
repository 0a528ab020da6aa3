pub mod catalog;
#[cfg(feature = "stac")]
pub mod stac;
pub mod uploads;
