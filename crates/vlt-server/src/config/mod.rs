// crates/vlt-server/src/config/mod.rs
// Configuration: environment settings + vlt.toml project file

pub mod env;
pub mod file;

pub use env::Settings;
pub use file::{
    CoderagConfig, DeltaConfig, EmbeddingConfig, OracleConfig, ProjectConfig, RepoMapConfig,
    VltConfig, find_vlt_toml, load_vlt_config,
};
