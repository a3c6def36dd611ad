pub mod financials;
pub mod indices;
pub mod notoria;
pub mod profile;
pub mod reports;
pub mod shareholders;
