use tonic::Request;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Correlation id carried by the caller in `x-correlation-id`, or a fresh
/// one when the header is absent or empty.
pub fn correlation_id<T>(request: &Request<T>) -> String {
    request
        .metadata()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_header_when_present() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(CORRELATION_HEADER, "corr-42".parse().unwrap());
        assert_eq!(correlation_id(&request), "corr-42");
    }

    #[test]
    fn generates_uuid_otherwise() {
        let request = Request::new(());
        let id = correlation_id(&request);
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, correlation_id(&request));
    }
}
