//! Composition des en-têtes et envoi du corps
//!
//! Le point de commit est l'envoi des en-têtes : avant, toute erreur est
//! encore classée (voir [`ProxyError`]) ; après, seule l'interruption du
//! flux est possible.

use crate::backend::FetchResult;
use crate::codec::Encoded;
use crate::error::{ProxyError, Result};
use crate::params::TransformSpec;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};

/// Valeur d'un en-tête imposé par l'appelant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOverride {
    Set(HeaderValue),
    /// Retire l'en-tête de la réponse
    Unset,
}

/// Applique les en-têtes de l'appelant par-dessus `headers`
pub fn apply_overrides(headers: &mut HeaderMap, overrides: &[(HeaderName, HeaderOverride)]) {
    for (name, value) in overrides {
        match value {
            HeaderOverride::Set(v) => {
                headers.insert(name.clone(), v.clone());
            }
            HeaderOverride::Unset => {
                headers.remove(name);
            }
        }
    }
}

/// Ajoute l'empreinte de la transformation au validateur de la source
///
/// `"abc"` devient `"abc-w100h50"`, `W/"abc"` devient `W/"abc-w100h50"`.
pub fn compose_etag(validator: &str, fingerprint: &str) -> String {
    match validator.strip_suffix('"') {
        Some(head) if head.contains('"') => format!("{}-{}\"", head, fingerprint),
        _ => format!("\"{}-{}\"", validator.trim_matches('"'), fingerprint),
    }
}

/// Relaie la source telle quelle
///
/// Le premier chunk est lu avant le commit pour que les sources qui
/// échouent à la première lecture soient encore classées.
pub async fn passthrough(
    fetched: FetchResult,
    overrides: &[(HeaderName, HeaderOverride)],
) -> Result<Response> {
    let FetchResult {
        mut stream,
        mime_type,
        mut headers,
        ..
    } = fetched;

    let first = match stream.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => return Err(ProxyError::from_io("reading source", &e)),
        None => None,
    };

    if let Ok(v) = HeaderValue::from_str(&mime_type) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    apply_overrides(&mut headers, overrides);

    let body = futures::stream::iter(first.map(Ok))
        .chain(stream)
        .inspect_err(|e| tracing::warn!("Source stream aborted mid-response: {}", e));

    let mut response = Body::from_stream(body).into_response();
    *response.headers_mut() = headers;
    Ok(response)
}

/// Envoie une image transformée
pub fn transformed(
    encoded: Encoded,
    validator: Option<&str>,
    spec: &TransformSpec,
    overrides: &[(HeaderName, HeaderOverride)],
) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&encoded.mime_type) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.bytes.len()));
    if let Some(etag) = validator
        .map(|v| compose_etag(v, &spec.fingerprint()))
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(header::ETAG, etag);
    }
    apply_overrides(&mut headers, overrides);

    let mut response = Body::from(encoded.bytes).into_response();
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::io;

    fn fetched(chunks: Vec<io::Result<Bytes>>) -> FetchResult {
        let mut headers = HeaderMap::new();
        headers.insert(header::ETAG, HeaderValue::from_static("\"v1\""));
        headers.insert("x-powered-by", HeaderValue::from_static("origin"));
        FetchResult {
            stream: futures::stream::iter(chunks).boxed(),
            mime_type: "image/png".to_string(),
            size: None,
            validator: Some("\"v1\"".to_string()),
            headers,
        }
    }

    #[test]
    fn test_compose_etag() {
        assert_eq!(compose_etag("\"abc\"", "w100h50"), "\"abc-w100h50\"");
        assert_eq!(compose_etag("W/\"10-ff\"", "w5r"), "W/\"10-ff-w5r\"");
        assert_eq!(compose_etag("abc", "h3"), "\"abc-h3\"");
    }

    #[test]
    fn test_overrides_set_and_unset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-powered-by", HeaderValue::from_static("origin"));
        let overrides = vec![
            (
                header::CACHE_CONTROL,
                HeaderOverride::Set(HeaderValue::from_static("max-age=60")),
            ),
            (HeaderName::from_static("x-powered-by"), HeaderOverride::Unset),
        ];
        apply_overrides(&mut headers, &overrides);
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=60");
        assert!(!headers.contains_key("x-powered-by"));
    }

    #[tokio::test]
    async fn test_passthrough_forwards_headers_and_bytes() {
        let source = fetched(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]);
        let response = passthrough(source, &[]).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::ETAG], "\"v1\"");
        assert_eq!(response.headers()["x-powered-by"], "origin");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abcd");
    }

    #[tokio::test]
    async fn test_first_chunk_error_is_classified() {
        let missing = fetched(vec![Err(io::Error::new(io::ErrorKind::NotFound, "gone"))]);
        assert!(passthrough(missing, &[]).await.unwrap_err().is_defer());

        let broken = fetched(vec![Err(io::Error::other("disk on fire"))]);
        assert!(matches!(
            passthrough(broken, &[]).await.unwrap_err(),
            ProxyError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_source_gives_empty_body() {
        let response = passthrough(fetched(vec![]), &[]).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_transformed_headers() {
        let spec = TransformSpec::from_query(Some("w=10&h=20")).unwrap().unwrap();
        let encoded = Encoded {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        };
        let overrides = vec![(
            header::CACHE_CONTROL,
            HeaderOverride::Set(HeaderValue::from_static("public")),
        )];
        let response = transformed(encoded, Some("\"v1\""), &spec, &overrides);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "3");
        assert_eq!(headers[header::ETAG], "\"v1-w10h20\"");
        assert_eq!(headers[header::CACHE_CONTROL], "public");
        assert!(!headers.contains_key("x-powered-by"));
    }
}
