//! CI maintenance tooling for the collector's Helm chart and mock data

pub mod github;
pub mod images;
pub mod prom_fixture;
