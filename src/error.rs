//! Error classification and HTML error responses

use crate::pages::{PageCache, ERROR_PAGE_ID};
use crate::render::{self, TOKEN_ERROR_MESSAGE};
use crate::resolver::RenderContext;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Project id logged for requests that never resolved to a project
pub const INVALID_PROJECT_ID: &str = "INVALID";

/// Response class for failed requests.
///
/// Anything shaped like a missing file maps to `NotFound`; every other
/// failure maps to `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Internal,
}

impl ErrorClass {
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorClass::NotFound,
            _ => ErrorClass::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "Not Found.",
            ErrorClass::Internal => "Internal Error.",
        }
    }
}

/// Build the error response for a failed request.
///
/// Renders the cached error page with `${ERROR.MESSAGE}` substituted when
/// one is available; otherwise a plain-text status line is sent.
pub fn html_error_response(
    pages: &PageCache,
    ctx: &RenderContext<'_>,
    class: ErrorClass,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status = class.status_code();

    let (body, content_type) = match pages.get_by_id(ERROR_PAGE_ID) {
        Some(page) => {
            let rendered = render::render(
                page,
                "",
                INVALID_PROJECT_ID,
                None,
                None,
                ctx.instance_id,
                ctx.version,
            );
            let rendered = render::replace_token_ci(&rendered, TOKEN_ERROR_MESSAGE, class.message());
            (rendered, "text/html; charset=utf-8")
        }
        None => (
            format!("{} {}", status.as_u16(), class.message()),
            "text/plain; charset=utf-8",
        ),
    };

    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CTX: RenderContext<'static> = RenderContext {
        instance_id: "test-instance",
        version: "0.5.1",
        public_port: "8080",
    };

    #[test]
    fn test_io_error_classification() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(ErrorClass::from_io(&not_found), ErrorClass::NotFound);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ErrorClass::from_io(&denied), ErrorClass::Internal);
    }

    #[test]
    fn test_status_codes_and_messages() {
        assert_eq!(ErrorClass::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorClass::NotFound.message(), "Not Found.");
        assert_eq!(
            ErrorClass::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorClass::Internal.message(), "Internal Error.");
    }

    #[test]
    fn test_plain_text_fallback_without_cached_error_page() {
        let pages = PageCache::new();

        let response = html_error_response(&pages, &CTX, ErrorClass::NotFound);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[hyper::header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_error_page_is_rendered_with_message() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error.html");
        fs::write(&path, "<p>${ERROR.MESSAGE}</p><i>${PROJECT.SUBTITLE}</i>").unwrap();

        let mut pages = PageCache::new();
        pages.load(&path, Some(ERROR_PAGE_ID));

        let response = html_error_response(&pages, &CTX, ErrorClass::Internal);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<p>Internal Error.</p>"));
        assert!(body.contains("<i>INVALID</i>"));
    }
}
