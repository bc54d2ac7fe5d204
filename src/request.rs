//! Outgoing request construction: target validation, query-string
//! composition, header normalization, basic auth and entity bodies.

use crate::config::RequestOptions;
use crate::error::HttpError;
use crate::pool::Route;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::Full;

/// Parse and validate a request target, yielding the URI and its pooling
/// route.
///
/// Requires an absolute URI with scheme and authority; only `http` and
/// `https` schemes are accepted (whether `https` is actually usable is the
/// transport's decision).
pub(crate) fn parse_target(url: &str) -> Result<(Uri, Route), HttpError> {
    let uri: Uri = url.parse().map_err(|err: http::uri::InvalidUri| {
        HttpError::InvalidUri {
            url: url.to_owned(),
            reason: err.to_string(),
        }
    })?;

    let Some(authority) = uri.authority() else {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            reason: "missing host/authority".to_owned(),
        });
    };

    let scheme = match uri.scheme_str() {
        Some(scheme @ ("http" | "https")) => scheme,
        Some(other) => {
            return Err(HttpError::InvalidScheme {
                scheme: other.to_owned(),
                reason: "only http:// and https:// are supported".to_owned(),
            });
        }
        None => {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                reason: "missing scheme".to_owned(),
            });
        }
    };

    let port = uri
        .port_u16()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });
    let route = Route::new(scheme, authority.host(), port);
    Ok((uri, route))
}

/// Replace the target's query string with the encoded `params`.
pub(crate) fn with_query(url: &str, params: &[(String, String)]) -> Result<String, HttpError> {
    let encoded = serde_urlencoded::to_string(params)?;
    let base = url.split('?').next().unwrap_or(url);
    Ok(format!("{base}?{encoded}"))
}

/// Build the outgoing request for one attempt.
///
/// The target is origin-form (hyper's low-level client sends the URI as
/// given), so the authority goes into an explicit `Host` header. Header
/// names from options normalize `_` to `-`; later values replace earlier
/// ones of the same name. The entity follows the body-descriptor
/// precedence: raw body, then form, then json; a derived Content-Type is
/// only set when the caller supplied none. Basic auth is applied last and
/// overrides any existing `Authorization` header.
pub(crate) fn build_request(
    method: &Method,
    uri: &Uri,
    options: &RequestOptions,
) -> Result<Request<Full<Bytes>>, HttpError> {
    let mut headers = HeaderMap::new();

    let Some(authority) = uri.authority() else {
        return Err(HttpError::InvalidUri {
            url: uri.to_string(),
            reason: "missing host/authority".to_owned(),
        });
    };
    headers.insert(http::header::HOST, HeaderValue::try_from(authority.as_str())?);

    for (name, value) in &options.headers {
        let name = HeaderName::try_from(name.replace('_', "-"))?;
        headers.insert(name, HeaderValue::try_from(value.as_str())?);
    }

    let (body, derived_content_type) = build_entity(options)?;
    if let Some(content_type) = derived_content_type
        && !headers.contains_key(http::header::CONTENT_TYPE)
    {
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::try_from(content_type)?,
        );
    }

    if let Some(auth) = &options.basic_auth {
        let credentials = BASE64.encode(format!("{}:{}", auth.user, auth.password));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::try_from(format!("Basic {credentials}"))?,
        );
    }

    let target = uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    let mut request = Request::builder()
        .method(method.clone())
        .uri(target)
        .body(Full::new(body.unwrap_or_default()))?;
    *request.headers_mut() = headers;
    Ok(request)
}

/// Encode the entity, if any. First applicable descriptor wins:
/// raw body > form > json.
fn build_entity(options: &RequestOptions) -> Result<(Option<Bytes>, Option<String>), HttpError> {
    if let Some(raw) = &options.body {
        let media = options.content_type.as_deref().unwrap_or("text/plain");
        return Ok((
            Some(Bytes::from(raw.clone())),
            Some(format!("{media}; charset=UTF-8")),
        ));
    }
    if let Some(fields) = &options.form {
        let encoded = serde_urlencoded::to_string(fields)?;
        return Ok((
            Some(Bytes::from(encoded)),
            Some("application/x-www-form-urlencoded; charset=UTF-8".to_owned()),
        ));
    }
    if let Some(value) = &options.json {
        let encoded = serde_json::to_vec(value).map_err(HttpError::Json)?;
        return Ok((
            Some(Bytes::from(encoded)),
            Some("application/json; charset=UTF-8".to_owned()),
        ));
    }
    Ok((None, None))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::RequestOptions;

    fn header<'a>(request: &'a Request<Full<Bytes>>, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn body_bytes(request: Request<Full<Bytes>>) -> Bytes {
        use http_body_util::BodyExt;
        let body = request.into_body();
        // Full yields its chunk synchronously.
        futures_executor_block_on(async move { body.collect().await.unwrap().to_bytes() })
    }

    // Minimal block_on so the tests don't need a runtime for Full bodies.
    fn futures_executor_block_on<F: std::future::Future>(future: F) -> F::Output {
        use std::pin::pin;
        use std::sync::Arc;
        use std::task::{Context, Poll, Wake, Waker};

        struct Noop;
        impl Wake for Noop {
            fn wake(self: Arc<Self>) {}
        }

        let waker = Waker::from(Arc::new(Noop));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
        }
    }

    #[test]
    fn parse_target_extracts_the_route() {
        let (_, route) = parse_target("http://example.com/api/v1?x=1").unwrap();
        assert_eq!(route, Route::new("http", "example.com", 80));

        let (_, route) = parse_target("https://example.com:8443/").unwrap();
        assert_eq!(route, Route::new("https", "example.com", 8443));
    }

    #[test]
    fn parse_target_rejects_relative_and_exotic_urls() {
        assert!(matches!(
            parse_target("/just/a/path"),
            Err(HttpError::InvalidUri { .. })
        ));
        assert!(matches!(
            parse_target("ftp://example.com/file"),
            Err(HttpError::InvalidScheme { .. })
        ));
    }

    #[test]
    fn with_query_replaces_an_existing_query_string() {
        let params = vec![("q".to_owned(), "rust http".to_owned())];
        assert_eq!(
            with_query("http://example.com/search?old=1", &params).unwrap(),
            "http://example.com/search?q=rust+http"
        );
        assert_eq!(
            with_query("http://example.com/search", &params).unwrap(),
            "http://example.com/search?q=rust+http"
        );
    }

    #[test]
    fn host_header_and_origin_form_target() {
        let (uri, _) = parse_target("http://example.com:8080/api?x=1").unwrap();
        let request = build_request(&Method::GET, &uri, &RequestOptions::new()).unwrap();
        assert_eq!(header(&request, "host"), Some("example.com:8080"));
        assert_eq!(request.uri(), "/api?x=1");
    }

    #[test]
    fn form_body_and_derived_content_type() {
        let (uri, _) = parse_target("http://example.com/submit").unwrap();
        let options =
            RequestOptions::new().form(vec![("foo".to_owned(), "bar".to_owned())]);
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(
            header(&request, "content-type"),
            Some("application/x-www-form-urlencoded; charset=UTF-8")
        );
        assert_eq!(&body_bytes(request)[..], b"foo=bar");
    }

    #[test]
    fn json_body_and_derived_content_type() {
        let (uri, _) = parse_target("http://example.com/submit").unwrap();
        let options = RequestOptions::new()
            .json(&serde_json::json!({"foo": "bar"}))
            .unwrap();
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(
            header(&request, "content-type"),
            Some("application/json; charset=UTF-8")
        );
        assert_eq!(&body_bytes(request)[..], br#"{"foo":"bar"}"#);
    }

    #[test]
    fn raw_body_defaults_to_text_plain() {
        let (uri, _) = parse_target("http://example.com/submit").unwrap();
        let options = RequestOptions::new().body("hello");
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(
            header(&request, "content-type"),
            Some("text/plain; charset=UTF-8")
        );
        assert_eq!(&body_bytes(request)[..], b"hello");
    }

    #[test]
    fn raw_body_wins_over_form_and_json() {
        let (uri, _) = parse_target("http://example.com/submit").unwrap();
        let options = RequestOptions::new()
            .body("raw")
            .form(vec![("a".to_owned(), "b".to_owned())])
            .json(&serde_json::json!({"c": "d"}))
            .unwrap();
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(&body_bytes(request)[..], b"raw");

        let options = RequestOptions::new()
            .form(vec![("a".to_owned(), "b".to_owned())])
            .json(&serde_json::json!({"c": "d"}))
            .unwrap();
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(&body_bytes(request)[..], b"a=b");
    }

    #[test]
    fn explicit_content_type_header_overrides_the_derived_one() {
        let (uri, _) = parse_target("http://example.com/submit").unwrap();
        let options = RequestOptions::new()
            .header("content-type", "application/x-json")
            .json(&serde_json::json!({"foo": "bar"}))
            .unwrap();
        let request = build_request(&Method::POST, &uri, &options).unwrap();
        assert_eq!(header(&request, "content-type"), Some("application/x-json"));
        assert_eq!(&body_bytes(request)[..], br#"{"foo":"bar"}"#);
    }

    #[test]
    fn header_names_normalize_underscores_to_hyphens() {
        let (uri, _) = parse_target("http://example.com/").unwrap();
        let options = RequestOptions::new().header("x_request_id", "abc123");
        let request = build_request(&Method::GET, &uri, &options).unwrap();
        assert_eq!(header(&request, "x-request-id"), Some("abc123"));
    }

    #[test]
    fn basic_auth_sets_and_overrides_the_authorization_header() {
        let (uri, _) = parse_target("http://example.com/").unwrap();
        let options = RequestOptions::new()
            .header("authorization", "Bearer stale-token")
            .basic_auth("user", "password");
        let request = build_request(&Method::GET, &uri, &options).unwrap();
        assert_eq!(
            header(&request, "authorization"),
            Some("Basic dXNlcjpwYXNzd29yZA==")
        );
        assert_eq!(
            request.headers().get_all("authorization").iter().count(),
            1
        );
    }
}
