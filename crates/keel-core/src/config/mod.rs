pub mod data;
pub mod error;
pub mod layer;
pub mod model;
pub mod resolver;
pub mod source;

pub use data::{ConfigData, ConfigFormat};
pub use error::ConfigSystemError;
pub use layer::{ConfigLayer, LayerKind};
pub use model::{
    EngineOptions, PluginConfiguration, PluginKey, PluginRole, ProjectIdentity, ProjectVersion,
    ResolvedConfiguration, RetryPolicy, SyncPolicy,
};
pub use resolver::{ConfigResolver, precedence};
pub use source::{ConfigSource, FileSource, InlineSource, ProjectSources};
