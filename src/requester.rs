//! Issues single HTTP requests. No mutation logic lives here.

use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::error::RequestError;
use crate::http1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Status code and body size of one completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub length: usize,
}

/// Performs exactly one round trip. Headers are sent in order and verbatim,
/// duplicates included.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, method: &str, uri: &str, headers: &[Header]) -> Result<Response, RequestError>;
}

/// Where a variant URI points, split without normalizing its path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestTarget {
    tls: bool,
    host: String,
    port: u16,
    /// `host[:port]` as written, used for `Host` and `CONNECT`.
    authority: String,
    /// Origin-form request-target; the fragment is never sent.
    path: String,
}

impl RequestTarget {
    fn parse(uri: &str) -> Option<Self> {
        let uri = uri.split_once('#').map_or(uri, |(before, _)| before);
        let (scheme, rest) = uri.split_once("://")?;
        let tls = if scheme.eq_ignore_ascii_case("https") {
            true
        } else if scheme.eq_ignore_ascii_case("http") {
            false
        } else {
            return None;
        };

        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(end);
        let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        if authority.is_empty() {
            return None;
        }

        let default_port = if tls { 443 } else { 80 };
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed.split_once(']')?;
                let port = match after.strip_prefix(':') {
                    Some(port) => port.parse().ok()?,
                    None if after.is_empty() => default_port,
                    None => return None,
                };
                (host, port)
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().ok()?),
                None => (authority, default_port),
            },
        };

        let path = match path.chars().next() {
            None => "/".to_string(),
            Some('?') => format!("/{path}"),
            Some(_) => path.to_string(),
        };

        Some(Self {
            tls,
            host: host.to_string(),
            port,
            authority: authority.to_string(),
            path,
        })
    }

    /// Absolute-form request-target, as sent to a forward proxy.
    fn absolute(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}{}", self.authority, self.path)
    }
}

#[derive(Debug, Clone)]
struct Proxy {
    host: String,
    port: u16,
    authorization: Option<String>,
}

impl Proxy {
    fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("Invalid proxy `{raw}`"))?;
        if url.scheme() != "http" {
            bail!("Unsupported proxy scheme `{}` (only http:// proxies are supported)", url.scheme());
        }
        let host = url
            .host_str()
            .with_context(|| format!("Proxy `{raw}` has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let authorization = if url.username().is_empty() {
            None
        } else {
            let user = urlencoding::decode(url.username())?;
            let password = urlencoding::decode(url.password().unwrap_or_default())?;
            Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
        };

        Ok(Self {
            host,
            port,
            authorization,
        })
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// Sends each variant on a fresh connection with the request-target
/// exactly as generated. Redirects are reported, not followed.
pub struct HttpExecutor {
    tls: Arc<ClientConfig>,
    proxy: Option<Proxy>,
    timeout: Duration,
}

impl HttpExecutor {
    /// Only the given proxy is used; proxy environment variables are ignored.
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let tls = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .context("Failed to build TLS configuration")?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            tls: Arc::new(tls),
            proxy: proxy.map(Proxy::parse).transpose()?,
            timeout,
        })
    }

    fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))))
    }

    fn wrap_tls(&self, tcp: TcpStream, host: &str) -> io::Result<Stream> {
        let name = ServerName::try_from(host.to_string()).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let connection = ClientConnection::new(Arc::clone(&self.tls), name).map_err(io::Error::other)?;
        Ok(Stream::Tls(Box::new(StreamOwned::new(connection, tcp))))
    }

    fn send(&self, method: &str, target: &RequestTarget, headers: &[Header]) -> io::Result<Response> {
        let mut headers = headers.to_vec();

        let (mut stream, request_target) = match &self.proxy {
            None => {
                let tcp = self.connect(&target.host, target.port)?;
                let stream = if target.tls {
                    self.wrap_tls(tcp, &target.host)?
                } else {
                    Stream::Plain(tcp)
                };
                (stream, target.path.clone())
            }
            Some(proxy) if target.tls => {
                let mut tcp = self.connect(&proxy.host, proxy.port)?;
                http1::establish_tunnel(&mut tcp, &target.authority, proxy.authorization.as_deref())?;
                (self.wrap_tls(tcp, &target.host)?, target.path.clone())
            }
            Some(proxy) => {
                if let Some(authorization) = &proxy.authorization {
                    headers.push(Header::new("Proxy-Authorization", authorization.as_str()));
                }
                let tcp = self.connect(&proxy.host, proxy.port)?;
                (Stream::Plain(tcp), target.absolute())
            }
        };

        http1::write_request(&mut stream, method, &request_target, &target.authority, &headers)?;
        http1::read_response(&mut BufReader::new(stream), method)
    }
}

impl Executor for HttpExecutor {
    fn execute(&self, method: &str, uri: &str, headers: &[Header]) -> Result<Response, RequestError> {
        http::Method::from_bytes(method.as_bytes()).map_err(|_| RequestError::InvalidMethod(method.to_string()))?;
        for header in headers {
            let valid = http::HeaderName::from_bytes(header.name.as_bytes()).is_ok()
                && http::HeaderValue::from_str(&header.value).is_ok();
            if !valid {
                return Err(RequestError::InvalidHeader(header.name.clone()));
            }
        }

        let target = RequestTarget::parse(uri).ok_or_else(|| RequestError::InvalidUri(uri.to_string()))?;
        self.send(method, &target, headers)
            .map_err(|source| RequestError::Transport {
                uri: uri.to_string(),
                source,
            })
    }
}

/// Add `http://` to a proxy given as bare `host:port`.
pub fn normalize_proxy(proxy: &str) -> String {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Accept one connection, send `reply`, and hand back the request head.
    fn serve_once(reply: String) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = io::BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }

            let mut stream = stream;
            stream.write_all(reply.as_bytes()).unwrap();
            stream.flush().unwrap();
            head
        });

        (addr.to_string(), handle)
    }

    fn reply(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn executor() -> HttpExecutor {
        HttpExecutor::new(None, TIMEOUT).unwrap()
    }

    #[test]
    fn reports_status_and_body_length() {
        let (addr, server) = serve_once(reply("403 Forbidden", "access denied"));

        let response = executor()
            .execute(
                "GET",
                &format!("http://{addr}/secret/"),
                &[Header::new("User-Agent", "gatecrash-test")],
            )
            .unwrap();

        assert_eq!(response, Response { status: 403, length: 13 });
        let head = server.join().unwrap();
        assert!(head.starts_with("GET /secret/ HTTP/1.1\r\n"));
        assert!(head.contains(&format!("Host: {addr}\r\n")));
        assert!(head.contains("User-Agent: gatecrash-test\r\n"));
    }

    #[test]
    fn mutated_paths_reach_the_server_unchanged() {
        let paths = [
            "/admin/..",
            "/admin/%2e%2e",
            "/admin//..",
            "/admin/..;/",
            "/api/%2e/admin",
            "/api/./admin",
            "/admin/%ff/",
        ];

        for path in paths {
            let (addr, server) = serve_once(reply("200 OK", ""));
            executor().execute("GET", &format!("http://{addr}{path}"), &[]).unwrap();

            let head = server.join().unwrap();
            let request_line = head.lines().next().unwrap();
            assert_eq!(request_line, format!("GET {path} HTTP/1.1"));
        }
    }

    #[test]
    fn fragment_is_not_sent() {
        let (addr, server) = serve_once(reply("200 OK", ""));
        executor().execute("GET", &format!("http://{addr}/admin/?id=1#?"), &[]).unwrap();

        assert!(server.join().unwrap().starts_with("GET /admin/?id=1 HTTP/1.1\r\n"));
    }

    #[test]
    fn duplicate_headers_are_sent_verbatim() {
        let (addr, server) = serve_once(reply("200 OK", ""));
        let headers = [
            Header::new("X-Forwarded-For", "10.0.0.1"),
            Header::new("X-Forwarded-For", "127.0.0.1"),
        ];

        let response = executor()
            .execute("POST", &format!("http://{addr}/"), &headers)
            .unwrap();

        assert_eq!(response.status, 200);
        let head = server.join().unwrap();
        assert!(head.starts_with("POST / HTTP/1.1\r\n"));
        assert_eq!(head.matches("X-Forwarded-For:").count(), 2);
    }

    #[test]
    fn requests_go_through_the_proxy() {
        let (proxy_addr, proxy) = serve_once(reply("401 Unauthorized", "nope"));
        let executor = HttpExecutor::new(Some(&format!("http://{proxy_addr}")), TIMEOUT).unwrap();

        let response = executor
            .execute(
                "GET",
                "http://target.example:8080/admin/..;/",
                &[Header::new("User-Agent", "gatecrash-test")],
            )
            .unwrap();

        assert_eq!(response, Response { status: 401, length: 4 });
        let head = proxy.join().unwrap();
        assert!(head.starts_with("GET http://target.example:8080/admin/..;/ HTTP/1.1\r\n"));
        assert!(head.contains("Host: target.example:8080\r\n"));
        assert!(!head.contains("Proxy-Authorization"));
    }

    #[test]
    fn proxy_credentials_are_forwarded() {
        let (proxy_addr, proxy) = serve_once(reply("200 OK", ""));
        let executor = HttpExecutor::new(Some(&format!("http://user:pass@{proxy_addr}")), TIMEOUT).unwrap();

        executor.execute("GET", "http://target.example/", &[]).unwrap();

        let head = proxy.join().unwrap();
        assert!(head.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[test]
    fn https_through_proxy_opens_a_tunnel() {
        let (proxy_addr, proxy) = serve_once("HTTP/1.1 403 Forbidden\r\n\r\n".to_string());
        let executor = HttpExecutor::new(Some(&format!("http://{proxy_addr}")), TIMEOUT).unwrap();

        let err = executor.execute("GET", "https://target.example/admin/", &[]).unwrap_err();

        assert!(matches!(err, RequestError::Transport { .. }));
        assert!(proxy.join().unwrap().starts_with("CONNECT target.example:443 HTTP/1.1\r\n"));
    }

    #[test]
    fn invalid_method_is_rejected_before_sending() {
        let err = executor().execute("BAD METHOD", "http://127.0.0.1:1/", &[]).unwrap_err();
        assert!(matches!(err, RequestError::InvalidMethod(_)));
    }

    #[test]
    fn header_injection_via_newline_is_rejected() {
        let headers = [Header::new("X-Test", "a\r\nInjected: 1")];
        let err = executor().execute("GET", "http://127.0.0.1:1/", &headers).unwrap_err();
        assert!(matches!(err, RequestError::InvalidHeader(name) if name == "X-Test"));
    }

    #[test]
    fn connection_failure_is_a_transport_error() {
        // bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let err = executor()
            .execute("GET", &format!("http://127.0.0.1:{port}/"), &[])
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
    }

    #[test]
    fn splits_uri_without_touching_the_path() {
        let target = RequestTarget::parse("https://user@[::1]:8443/a/../b?x=1#frag").unwrap();
        assert_eq!(
            target,
            RequestTarget {
                tls: true,
                host: "::1".to_string(),
                port: 8443,
                authority: "[::1]:8443".to_string(),
                path: "/a/../b?x=1".to_string(),
            }
        );

        let bare = RequestTarget::parse("http://example.com?q").unwrap();
        assert_eq!((bare.port, bare.path.as_str()), (80, "/?q"));
        assert_eq!(bare.absolute(), "http://example.com/?q");

        assert!(RequestTarget::parse("ftp://example.com/").is_none());
        assert!(RequestTarget::parse("http:///path").is_none());
        assert!(RequestTarget::parse("http://example.com:notaport/").is_none());
    }

    #[test]
    fn proxy_scheme_defaults_to_http() {
        assert_eq!(normalize_proxy("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(normalize_proxy("socks5://proxy:1080"), "socks5://proxy:1080");
        assert!(HttpExecutor::new(Some("socks5://proxy:1080"), TIMEOUT).is_err());
    }
}
