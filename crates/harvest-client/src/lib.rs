pub mod client;
pub mod sources;

pub use client::{ClientConfig, ProviderClient};
pub use sources::{CompaniesHouseSource, OpenCorporatesSource};
