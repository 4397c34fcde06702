pub mod agent;
pub mod auth;
pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod gmail;
pub mod http;
pub mod llm;
pub mod output;
pub mod rpc;
pub mod service;

pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use service::AgentService;
