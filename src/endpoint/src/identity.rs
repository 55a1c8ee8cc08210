use http::HeaderMap;

/// Verifies the identity of incoming requests, e.g. by checking a request
/// signature, before any protocol work happens. Failures map to 401.
///
/// The SDK ships only the seam and a pass-through implementation; the actual
/// signature scheme is deployment specific.
pub trait RequestIdentityVerifier: Send + Sync + 'static {
    fn verify(&self, headers: &HeaderMap) -> Result<(), IdentityVerificationError>;
}

#[derive(Debug, thiserror::Error)]
#[error("request identity verification failed: {0}")]
pub struct IdentityVerificationError(pub String);

/// Accepts every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughIdentityVerifier;

impl RequestIdentityVerifier for PassThroughIdentityVerifier {
    fn verify(&self, _headers: &HeaderMap) -> Result<(), IdentityVerificationError> {
        Ok(())
    }
}
