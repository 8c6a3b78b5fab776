pub mod companies_house;
pub mod opencorporates;

pub use companies_house::CompaniesHouseSource;
pub use opencorporates::OpenCorporatesSource;
