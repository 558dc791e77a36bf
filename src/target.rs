//! The probed resource, held as an origin plus an explicit list of path
//! segments so that path mutations splice by index.

use std::fmt;

use anyhow::{Context, Result, bail};
use url::{Position, Url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Everything before the path: scheme, userinfo, host and port.
    origin: String,
    segments: Vec<String>,
    trailing_slash: bool,
    query: Option<String>,
}

impl Target {
    /// Parse and normalize a target. A missing scheme defaults to `http://`.
    /// Paths with fewer than two segments get a trailing `/` so the path
    /// mutations always have an anchor.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut target = Self::parse_exact(raw)?;

        let populated = target.segments.iter().filter(|s| !s.is_empty()).count();
        if populated < 2 {
            target.trailing_slash = true;
        }

        Ok(target)
    }

    /// Parse without normalizing.
    pub fn parse_exact(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let url = Url::parse(&with_scheme).with_context(|| format!("Invalid target URL `{raw}`"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported scheme `{}` in target `{raw}`", url.scheme());
        }

        // url always yields a path beginning with `/` for http(s)
        let body = url.path().strip_prefix('/').unwrap_or(url.path());
        let trailing_slash = body.ends_with('/');
        let body = body.strip_suffix('/').unwrap_or(body);
        let segments = if body.is_empty() {
            Vec::new()
        } else {
            body.split('/').map(str::to_string).collect()
        };

        Ok(Self {
            origin: url[..Position::BeforePath].to_string(),
            segments,
            trailing_slash,
            query: url.query().map(str::to_string),
        })
    }

    /// The last path segment, if the path has any.
    pub fn final_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Origin plus every segment but the last, always ending in `/`.
    pub fn base(&self) -> String {
        let parents = &self.segments[..self.segments.len().saturating_sub(1)];
        let mut base = format!("{}/", self.origin);
        for segment in parents {
            base.push_str(segment);
            base.push('/');
        }
        base
    }

    /// Rebuild the URI with the final segment replaced, keeping the
    /// trailing slash and query of the original.
    pub fn with_final_segment(&self, segment: &str) -> String {
        let mut uri = self.base();
        uri.push_str(segment);
        if self.trailing_slash {
            uri.push('/');
        }
        self.push_query(&mut uri);
        uri
    }

    /// Append raw text to the path. The query stays attached to the path;
    /// anything from a `#` in the suffix onward goes after it.
    pub fn with_path_suffix(&self, suffix: &str) -> String {
        let (path_part, fragment) = match suffix.split_once('#') {
            Some((path_part, fragment)) => (path_part, Some(fragment)),
            None => (suffix, None),
        };

        let mut uri = self.path_uri();
        uri.push_str(path_part);
        self.push_query(&mut uri);
        if let Some(fragment) = fragment {
            uri.push('#');
            uri.push_str(fragment);
        }
        uri
    }

    fn path_uri(&self) -> String {
        let mut uri = format!("{}/{}", self.origin, self.segments.join("/"));
        if self.trailing_slash && !self.segments.is_empty() {
            uri.push('/');
        }
        uri
    }

    fn push_query(&self, uri: &mut String) {
        if let Some(query) = &self.query {
            uri.push('?');
            uri.push_str(query);
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.with_path_suffix(""))
    }
}
