pub mod config;
pub mod error;
pub mod observer;
pub mod source;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use observer::MatchObserver;
pub use source::{PatternSource, RejectedTemplate, TemplateBatch, TemplateFilter};
pub use types::*;
