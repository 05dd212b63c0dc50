use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provisioning rejected by cluster: {0}")]
    ProvisioningFailed(String),
}

impl Error {
    /// Determine if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ClusterUnavailable(_))
    }

    /// Map a kube client error into the crate taxonomy.
    ///
    /// Transport failures, timeouts, auth failures and 5xx responses are
    /// transient; 4xx responses (other than 404) mean the request itself is
    /// wrong and retrying cannot help.
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 429 || ae.code >= 500 => {
                Error::ClusterUnavailable(format!("{} ({})", ae.message, ae.code))
            }
            kube::Error::Api(ae) => {
                Error::ProvisioningFailed(format!("{} ({})", ae.message, ae.code))
            }
            e => Error::ClusterUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cluster_unavailable_is_retryable() {
        assert!(Error::ClusterUnavailable("timeout".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
        assert!(!Error::NotFound("ns".into()).is_retryable());
        assert!(!Error::ProvisioningFailed("quota".into()).is_retryable());
    }
}
