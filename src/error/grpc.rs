//! gRPC 错误处理
//!
//! 提供 MeshError 到 tonic::Status 的转换，便于业务 handler 直接用 `?` 返回

use super::{ErrorCode, MeshError};
use tonic::{Code, Status};

/// 将错误代码映射为 gRPC 状态码
pub fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::ConnectionFailed
        | ErrorCode::DiscoveryFailed
        | ErrorCode::ServiceUnavailable
        | ErrorCode::CircuitOpen => Code::Unavailable,
        ErrorCode::RegistrationFailed | ErrorCode::DeregistrationFailed => Code::Internal,
        ErrorCode::ConfigurationError => Code::InvalidArgument,
        ErrorCode::UnknownError => Code::Unknown,
    }
}

impl From<MeshError> for Status {
    fn from(err: MeshError) -> Self {
        let code = err.code();
        let mut status = Status::new(map_error_code_to_grpc(code), err.to_string());
        if let Ok(value) = code.as_str().parse() {
            status.metadata_mut().insert("x-error-code", value);
        }
        status
    }
}

/// gRPC 错误扩展 trait
pub trait MeshResultExt<T> {
    fn to_status(self) -> std::result::Result<T, Status>;
}

impl<T> MeshResultExt<T> for super::Result<T> {
    fn to_status(self) -> std::result::Result<T, Status> {
        self.map_err(Status::from)
    }
}
