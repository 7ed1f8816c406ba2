pub mod database;
pub mod health;
pub mod resolver;
pub mod server;

pub use database::{
    DatabaseSnapshot, GroupDefinition, KeyInfo, ResolvedKey, ServerDatabase, ServerSelection,
};
pub use health::{HealthPolicy, HealthState, ServerHealth, ServerHealthSnapshot};
pub use resolver::{GroupResolver, ResolutionLoop, ServerProber};
pub use server::{ProxyConfig, ProxyKind, Server, ServerError};
