pub mod drone;
pub mod satellite;
pub mod vegetation;
