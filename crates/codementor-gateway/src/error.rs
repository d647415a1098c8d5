use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("failed to prepare upload directory {0}: {1}")]
    UploadDir(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = GatewayError::Bind(
            "127.0.0.1:8000".into(),
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:8000: in use");
    }
}
