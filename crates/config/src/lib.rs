//! Configuration: schema, discovery and loading (TOML / YAML / JSON).

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_or_default_config_path,
        load_config, set_config_dir,
    },
    schema::{
        AutoReplyConfig, DomesticPlanConfig, ForeignPlanConfig, GatewayConfig, PhoneConfig,
        ProviderConfig, ProviderKind, SessionsConfig, ZapgateConfig,
    },
};
