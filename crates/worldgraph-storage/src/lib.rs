//! World storage for Worldgraph.
//!
//! - [`DatabaseManager`]: resolves a world to its physical SQLite database,
//!   with a local-file backend and a remote-provisioned backend.
//! - [`WorldCatalog`]: world metadata in the control-plane database.
//! - [`TripleStore`]: the graph query/update engine bound to one world
//!   database ([`OxigraphTripleStore`] runs SPARQL on the world's oxigraph
//!   store).

pub mod catalog;
pub mod local;
pub mod manager;
pub mod provisioning;
pub mod registry;
pub mod remote;
pub mod triple_store;

pub use catalog::WorldCatalog;
pub use local::LocalFileDatabaseManager;
pub use manager::{build_database_manager, DatabaseManager, ManagedDatabase, StorageBackend};
pub use provisioning::{HttpProvisioningClient, ProvisionedDatabase, ProvisioningService};
pub use registry::HandleRegistry;
pub use remote::RemoteDatabaseManager;
pub use triple_store::{QueryResults, OxigraphTripleStore, TripleStore};
