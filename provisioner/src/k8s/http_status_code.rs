pub use http::StatusCode;

/// Extracts the HTTP status of a failed API call so callers can treat `404` and `409` as answers
/// rather than failures.
pub trait HttpStatusCode {
    fn status_code(&self) -> Option<StatusCode>;

    fn is_status_code(&self, status_code: StatusCode) -> bool {
        self.status_code()
            .map(|some| some == status_code)
            .unwrap_or_default()
    }

    fn is_not_found(&self) -> bool {
        self.is_status_code(StatusCode::NOT_FOUND)
    }
}

impl HttpStatusCode for kube::Error {
    fn status_code(&self) -> Option<StatusCode> {
        if let kube::Error::Api(error_response) = self {
            StatusCode::from_u16(error_response.code).ok()
        } else {
            None
        }
    }
}

impl HttpStatusCode for crate::error::Error {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            crate::error::Error::Kube { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl<T, E> HttpStatusCode for std::result::Result<T, E>
where
    E: HttpStatusCode,
{
    fn status_code(&self) -> Option<StatusCode> {
        self.as_ref().err().and_then(|e| e.status_code())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "nope".to_string(),
            reason: "NotFound".to_string(),
            code,
        })
    }

    #[test]
    fn status_codes() {
        assert!(api_error(404).is_not_found());
        assert!(api_error(409).is_status_code(StatusCode::CONFLICT));
        let result: std::result::Result<(), kube::Error> = Err(api_error(404));
        assert!(result.is_not_found());
        let ok: std::result::Result<(), kube::Error> = Ok(());
        assert_eq!(ok.status_code(), None);
    }
}
