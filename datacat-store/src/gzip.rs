//! Optional gzip request-body decoding (spec.md §6: "Request bodies MAY be
//! gzip-encoded when a `Content-Encoding: gzip` header is present.").

use std::io::Read;

use axum::http::HeaderMap;

/// Decodes `body` if `headers` carries `Content-Encoding: gzip`, otherwise
/// returns it unchanged.
pub fn maybe_decompress(headers: &HeaderMap, body: &[u8]) -> std::io::Result<Vec<u8>> {
    let is_gzip = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !is_gzip {
        return Ok(body.to_vec());
    }
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decompresses_when_header_present() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"{\"hello\":true}").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_ENCODING, "gzip".parse().unwrap());
        let decoded = maybe_decompress(&headers, &compressed).unwrap();
        assert_eq!(decoded, b"{\"hello\":true}");
    }

    #[test]
    fn passes_through_when_header_absent() {
        let headers = HeaderMap::new();
        let decoded = maybe_decompress(&headers, b"plain").unwrap();
        assert_eq!(decoded, b"plain");
    }
}
