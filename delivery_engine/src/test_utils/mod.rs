pub mod fake_provider;
pub mod fixtures;
#[cfg(feature = "sqlite")]
pub mod prepare_env;
