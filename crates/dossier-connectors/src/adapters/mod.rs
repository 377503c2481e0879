pub mod archive;
pub mod breach_database;
pub mod cert_transparency;
pub mod code_repository;
pub mod domain_registry;
pub mod search_engine;

pub use archive::WaybackConnector;
pub use breach_database::BreachDatabaseConnector;
pub use cert_transparency::CertTransparencyConnector;
pub use code_repository::CodeRepositoryConnector;
pub use domain_registry::DomainRegistryConnector;
pub use search_engine::SearchEngineConnector;
