//! Meshgate 错误处理模块
//!
//! 错误分类：注册、注销、发现、无可用实例、连接、熔断、配置

pub mod code;
pub mod grpc;
pub mod mesh_error;

pub use code::{ErrorCategory, ErrorCode};
pub use grpc::{MeshResultExt, map_error_code_to_grpc};
pub use mesh_error::{MeshError, Result};
