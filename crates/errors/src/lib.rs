//! svckit-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    /// 配置缺失或无效（规范化之后仍缺少必需字段）
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// 所有连接尝试均失败
    #[error("Unable to connect to {address} after {attempts} attempts")]
    ConnectionExhausted { attempts: u32, address: String },

    /// 释放连接资源失败
    #[error("Failed to close connection: {0}")]
    CloseFailed(String),

    /// 携带任意 HTTP 状态码的错误
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn configuration_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn connection_exhausted(attempts: u32, address: impl Into<String>) -> Self {
        Self::ConnectionExhausted {
            attempts,
            address: address.into(),
        }
    }

    pub fn close_failed(msg: impl Into<String>) -> Self {
        Self::CloseFailed(msg.into())
    }

    /// 500 Internal Server Error
    pub fn internal_server_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 422 Unprocessable Entity
    pub fn unprocessable_entity(msg: impl Into<String>) -> Self {
        Self::UnprocessableEntity(msg.into())
    }

    /// 使用指定的 HTTP 状态码创建错误
    pub fn with_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::UnprocessableEntity(_) => 422,
            Self::Internal(_) => 500,
            Self::ExternalService(_) => 502,
            Self::ConfigurationInvalid(_) => 500,
            Self::ConnectionExhausted { .. } => 503,
            Self::CloseFailed(_) => 500,
            Self::Http { status, .. } => *status,
        }
    }

    /// 是否为连接类错误
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionExhausted { .. } | Self::ExternalService(_) | Self::CloseFailed(_)
        )
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: format!("https://api.svckit.dev/problems/{}", self.problem_slug()),
            title: self.problem_title().to_string(),
            status: self.status_code(),
            detail: self.to_string(),
            instance: None,
        }
    }

    fn problem_slug(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::UnprocessableEntity(_) => "unprocessable-entity",
            Self::Internal(_) => "internal",
            Self::ExternalService(_) => "external-service",
            Self::ConfigurationInvalid(_) => "configuration-invalid",
            Self::ConnectionExhausted { .. } => "connection-exhausted",
            Self::CloseFailed(_) => "close-failed",
            Self::Http { .. } => "http",
        }
    }

    fn problem_title(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Resource Not Found",
            Self::Validation(_) => "Validation Error",
            Self::UnprocessableEntity(_) => "Unprocessable Entity",
            Self::Internal(_) => "Internal Server Error",
            Self::ExternalService(_) => "External Service Error",
            Self::ConfigurationInvalid(_) => "Invalid Configuration",
            Self::ConnectionExhausted { .. } => "Connection Exhausted",
            Self::CloseFailed(_) => "Close Failed",
            Self::Http { .. } => "HTTP Error",
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    /// 序列化为 JSON 响应体
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "title": self.title, "status": self.status })
        })
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
