mod settings;

pub use settings::{
    AuthConfig, BrokerConfig, PipelineConfig, QueueConfig, ReconnectConfig, Settings, TenantConfig,
};
