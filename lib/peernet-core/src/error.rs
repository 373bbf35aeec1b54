use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Conflict updating {0}: the object has been modified")]
    Conflict(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid CIDR {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Subnet {subnet} overlaps reserved subnet {existing}")]
    SubnetOverlap { subnet: String, existing: String },

    #[error("No free /{prefix} subnet left in the address pool for cluster {cluster_id}")]
    PoolExhausted { cluster_id: String, prefix: u8 },

    #[error("Unsupported address family for {0}: only IPv4 ranges can be remapped")]
    UnsupportedAddressFamily(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classify a Kubernetes API error for the object `name`.
    ///
    /// 404 becomes NotFound, 409 AlreadyExists or Conflict depending on the
    /// reason reported by the API server.
    pub fn from_kube(err: kube::Error, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => CoreError::NotFound(name.to_string()),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                CoreError::AlreadyExists(name.to_string())
            }
            kube::Error::Api(resp) if resp.code == 409 => CoreError::Conflict(name.to_string()),
            _ => CoreError::KubernetesError(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoreError::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_classifies_api_errors() {
        assert!(CoreError::from_kube(api_error(404, "NotFound"), "a").is_not_found());
        assert!(CoreError::from_kube(api_error(409, "Conflict"), "a").is_conflict());
        assert!(CoreError::from_kube(api_error(409, "AlreadyExists"), "a").is_already_exists());
        assert!(matches!(
            CoreError::from_kube(api_error(500, "InternalError"), "a"),
            CoreError::KubernetesError(_)
        ));
    }
}
