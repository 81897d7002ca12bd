//! # Receptor Configuration
//!
//! Settings shared by every router and membrane in a process.
//!
//! ## Features
//!
//! - **Router Settings**: reserved system protocol, exception protocol,
//!   always-on senders that bypass the emit check
//! - **Queue Settings**: bound, time-to-live and overflow policy for carriers
//!   waiting on a receiver
//! - **Logging Settings**: level and output format for `tracing`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use receptor_config::{init_logging, ReceptorConfig};
//!
//! let config = ReceptorConfig::load(Some(std::path::Path::new("config/receptors.toml")))?;
//! init_logging(&config.logging)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod logging;
pub mod router_config;

pub use logging::init_logging;
pub use router_config::{
    LoggingSettings, OverflowPolicy, QueueSettings, ReceptorConfig, RouterSettings,
};
