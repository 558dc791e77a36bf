//! Just enough HTTP/1.1 to send one request per connection and measure the
//! answer. The request-target goes on the wire byte for byte as given, so
//! dot segments and odd escapes are never normalized away.

use std::fmt::Write as _;
use std::io::{self, BufRead, Read, Write};

use crate::requester::{Header, Response};

/// Write the request head. A `Host` header is added unless the caller
/// supplied one; the connection is always closed after the response.
pub fn write_request<W: Write>(
    out: &mut W,
    method: &str,
    request_target: &str,
    host: &str,
    headers: &[Header],
) -> io::Result<()> {
    let has = |name: &str| headers.iter().any(|h| h.name.eq_ignore_ascii_case(name));

    let mut head = format!("{method} {request_target} HTTP/1.1\r\n");
    if !has("host") {
        let _ = write!(head, "Host: {host}\r\n");
    }
    for header in headers {
        let _ = write!(head, "{}: {}\r\n", header.name, header.value);
    }
    if matches!(method, "POST" | "PUT" | "PATCH") && !has("content-length") {
        head.push_str("Content-Length: 0\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");

    out.write_all(head.as_bytes())?;
    out.flush()
}

/// Open a tunnel through a proxy and check that it was accepted.
/// The reader must not buffer past the proxy's response head.
pub fn establish_tunnel<S: Read + Write>(stream: &mut S, authority: &str, authorization: Option<&str>) -> io::Result<()> {
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(authorization) = authorization {
        let _ = write!(head, "Proxy-Authorization: {authorization}\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.flush()?;

    // one byte at a time so the TLS handshake starts on a clean stream
    let mut reader = io::BufReader::with_capacity(1, stream);
    let status = read_status_line(&mut reader)?;
    read_headers(&mut reader)?;
    if !(200..300).contains(&status) {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("proxy refused tunnel to {authority} with status {status}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ResponseHead {
    content_length: Option<u64>,
    chunked: bool,
}

/// Read status and headers, then drain the body to count its bytes.
/// Interim 1xx responses are skipped.
pub fn read_response<R: BufRead>(reader: &mut R, method: &str) -> io::Result<Response> {
    let (status, head) = loop {
        let status = read_status_line(reader)?;
        let head = read_headers(reader)?;
        if !(100..200).contains(&status) || status == 101 {
            break (status, head);
        }
    };

    let bodyless = method.eq_ignore_ascii_case("HEAD") || matches!(status, 100..=199 | 204 | 304);
    let length = if bodyless {
        0
    } else if head.chunked {
        read_chunked(reader)?
    } else if let Some(expected) = head.content_length {
        count_bytes(&mut reader.by_ref().take(expected))?
    } else {
        count_bytes(reader)?
    };

    Ok(Response { status, length })
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-response",
        ));
    }
    Ok(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string())
}

fn read_status_line<R: BufRead>(reader: &mut R) -> io::Result<u16> {
    let line = read_line(reader)?;
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| invalid(format!("bad status code in `{line}`"))),
        _ => Err(invalid(format!("bad status line `{line}`"))),
    }
}

fn read_headers<R: BufRead>(reader: &mut R) -> io::Result<ResponseHead> {
    let mut head = ResponseHead::default();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            return Ok(head);
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .parse()
                .map_err(|_| invalid(format!("bad Content-Length `{value}`")))?;
            head.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            head.chunked = value.to_ascii_lowercase().contains("chunked");
        }
    }
}

fn read_chunked<R: BufRead>(reader: &mut R) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let line = read_line(reader)?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16).map_err(|_| invalid(format!("bad chunk size `{line}`")))?;

        if size == 0 {
            // trailers; some servers close without the final blank line
            loop {
                match read_line(reader) {
                    Ok(line) if line.is_empty() => return Ok(total),
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(total),
                    Err(err) => return Err(err),
                }
            }
        }

        let read = count_bytes(&mut reader.by_ref().take(size as u64))?;
        if read < size {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated chunk"));
        }
        total += size;
        read_line(reader)?;
    }
}

/// Count bytes until EOF. A TLS peer that closes without `close_notify`
/// ends the body rather than failing it.
fn count_bytes<R: Read>(reader: &mut R) -> io::Result<usize> {
    let mut buf = [0u8; 8192];
    let mut total = 0;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(total),
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read(raw: &str, method: &str) -> io::Result<Response> {
        read_response(&mut Cursor::new(raw.as_bytes()), method)
    }

    #[test]
    fn request_target_is_written_verbatim() {
        let mut out = Vec::new();
        let headers = [Header::new("User-Agent", "gatecrash-test")];
        write_request(&mut out, "GET", "/api/./admin/%2e%2e/..;/", "example.com", &headers).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "GET /api/./admin/%2e%2e/..;/ HTTP/1.1\r\n\
             Host: example.com\r\n\
             User-Agent: gatecrash-test\r\n\
             Connection: close\r\n\r\n"
        );
    }

    #[test]
    fn caller_host_header_wins() {
        let mut out = Vec::new();
        let headers = [Header::new("Host", "localhost")];
        write_request(&mut out, "POST", "/", "example.com", &headers).unwrap();

        let head = String::from_utf8(out).unwrap();
        assert_eq!(head.matches("Host:").count(), 1);
        assert!(head.contains("Host: localhost\r\n"));
        assert!(head.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn counts_content_length_body() {
        let response = read("HTTP/1.1 403 Forbidden\r\nContent-Length: 5\r\n\r\nnope!extra", "GET").unwrap();
        assert_eq!(response, Response { status: 403, length: 5 });
    }

    #[test]
    fn decodes_chunked_body() {
        let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        assert_eq!(read(raw, "GET").unwrap(), Response { status: 200, length: 11 });
    }

    #[test]
    fn reads_until_close_without_length() {
        let response = read("HTTP/1.0 404 Not Found\r\nServer: test\r\n\r\nabc", "GET").unwrap();
        assert_eq!(response, Response { status: 404, length: 3 });
    }

    #[test]
    fn head_and_304_have_no_body() {
        assert_eq!(read("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", "HEAD").unwrap().length, 0);
        assert_eq!(read("HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n", "GET").unwrap().length, 0);
    }

    #[test]
    fn skips_interim_responses() {
        let raw = "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 401 Unauthorized\r\nContent-Length: 2\r\n\r\nno";
        assert_eq!(read(raw, "POST").unwrap(), Response { status: 401, length: 2 });
    }

    #[test]
    fn rejects_garbage_status_line() {
        let err = read("SSH-2.0-OpenSSH_9.6\r\n\r\n", "GET").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_reply_is_an_error() {
        let err = read("", "GET").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn tunnel_requires_success_status() {
        struct Duplex {
            input: Cursor<Vec<u8>>,
            output: Vec<u8>,
        }
        impl Read for Duplex {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }
        impl Write for Duplex {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut accepted = Duplex {
            input: Cursor::new(b"HTTP/1.1 200 Connection established\r\n\r\nTLS".to_vec()),
            output: Vec::new(),
        };
        establish_tunnel(&mut accepted, "example.com:443", Some("Basic dTpw")).unwrap();
        assert!(String::from_utf8_lossy(&accepted.output).starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(String::from_utf8_lossy(&accepted.output).contains("Proxy-Authorization: Basic dTpw\r\n"));
        // nothing after the proxy's head was consumed
        assert_eq!(accepted.input.position() as usize, "HTTP/1.1 200 Connection established\r\n\r\n".len());

        let mut refused = Duplex {
            input: Cursor::new(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        assert!(establish_tunnel(&mut refused, "example.com:443", None).is_err());
    }
}
