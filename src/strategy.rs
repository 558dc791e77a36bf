//! The five mutation axes. Each one turns the baseline request into a list
//! of variants; nothing here touches the network.

use std::fmt;

use anyhow::Result;
use log::warn;

use crate::payloads::{PayloadList, PayloadSource};
use crate::requester::Header;
use crate::target::Target;

/// One fully specified request plus the label it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub method: String,
    pub uri: String,
    pub headers: Vec<Header>,
    pub label: String,
}

impl Variant {
    fn get(uri: String, headers: &[Header], label: String) -> Self {
        Self {
            method: "GET".to_string(),
            uri,
            headers: headers.to_vec(),
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    MethodSweep,
    HeaderInjection,
    PathSuffix,
    PathPrefix,
    CasePermutation,
}

impl Strategy {
    /// Run order.
    pub const ALL: [Strategy; 5] = [
        Strategy::MethodSweep,
        Strategy::HeaderInjection,
        Strategy::PathSuffix,
        Strategy::PathPrefix,
        Strategy::CasePermutation,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Strategy::MethodSweep => "HTTP METHODS",
            Strategy::HeaderInjection => "HEADERS",
            Strategy::PathSuffix => "END PATHS",
            Strategy::PathPrefix => "MID PATHS",
            Strategy::CasePermutation => "CAPITALIZATION",
        }
    }

    /// Load this strategy's payload list, if it has one, and build its variants.
    pub fn variants(self, target: &Target, baseline: &[Header], payloads: &PayloadSource) -> Result<Vec<Variant>> {
        let variants = match self {
            Strategy::MethodSweep => method_sweep(target, baseline, &payloads.load(PayloadList::Methods)?),
            Strategy::HeaderInjection => header_injection(target, baseline, &payloads.load_headers()?),
            Strategy::PathSuffix => path_suffix(target, baseline, &payloads.load(PayloadList::EndPaths)?),
            Strategy::PathPrefix => path_prefix(target, baseline, &payloads.load(PayloadList::MidPaths)?),
            Strategy::CasePermutation => case_permutation(target, baseline),
        };
        Ok(variants)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

pub fn method_sweep(target: &Target, baseline: &[Header], methods: &[String]) -> Vec<Variant> {
    let uri = target.to_string();
    methods
        .iter()
        .map(|method| Variant {
            method: method.clone(),
            uri: uri.clone(),
            headers: baseline.to_vec(),
            label: method.clone(),
        })
        .collect()
}

pub fn header_injection(target: &Target, baseline: &[Header], injected: &[Header]) -> Vec<Variant> {
    let uri = target.to_string();
    injected
        .iter()
        .map(|header| {
            let mut headers = baseline.to_vec();
            headers.push(header.clone());
            Variant {
                method: "GET".to_string(),
                uri: uri.clone(),
                headers,
                label: format!("{}: {}", header.name, header.value),
            }
        })
        .collect()
}

pub fn path_suffix(target: &Target, baseline: &[Header], suffixes: &[String]) -> Vec<Variant> {
    suffixes
        .iter()
        .map(|suffix| {
            let uri = target.with_path_suffix(suffix);
            Variant::get(uri.clone(), baseline, uri)
        })
        .collect()
}

pub fn path_prefix(target: &Target, baseline: &[Header], prefixes: &[String]) -> Vec<Variant> {
    let Some(segment) = target.final_segment() else {
        warn!("{target} has no final path segment, skipping mid path injection");
        return Vec::new();
    };

    prefixes
        .iter()
        .map(|prefix| {
            let uri = target.with_final_segment(&format!("{prefix}{segment}"));
            Variant::get(uri.clone(), baseline, uri)
        })
        .collect()
}

/// One variant per character of the final segment, with only that
/// character upper-cased. Percent-encoded characters count once and are
/// re-encoded after upper-casing.
pub fn case_permutation(target: &Target, baseline: &[Header]) -> Vec<Variant> {
    let Some(segment) = target.final_segment() else {
        warn!("{target} has no final path segment, skipping capitalization");
        return Vec::new();
    };

    let units = segment_chars(segment);
    (0..units.len())
        .map(|position| {
            let mut mutated = String::with_capacity(segment.len());
            for (i, (decoded, written)) in units.iter().enumerate() {
                match decoded {
                    Some(c) if i == position => {
                        let upper: String = c.to_uppercase().collect();
                        if written.starts_with('%') {
                            mutated.push_str(&urlencoding::encode(&upper));
                        } else {
                            mutated.push_str(&upper);
                        }
                    }
                    _ => mutated.push_str(written),
                }
            }
            let uri = target.with_final_segment(&mutated);
            Variant::get(uri.clone(), baseline, uri)
        })
        .collect()
}

/// Split a percent-encoded segment into characters, each paired with the
/// exact text it was written as. Escapes that do not decode to UTF-8 stay
/// as opaque `%XX` units.
fn segment_chars(segment: &str) -> Vec<(Option<char>, &str)> {
    let mut units = Vec::new();
    let mut rest = segment;

    while let Some(first) = rest.chars().next() {
        let escaped = escaped_prefix_len(rest);
        if escaped == 0 {
            let (written, tail) = rest.split_at(first.len_utf8());
            units.push((Some(first), written));
            rest = tail;
            continue;
        }

        let (run, tail) = rest.split_at(escaped);
        let bytes = urlencoding::decode_binary(run.as_bytes());
        match std::str::from_utf8(&bytes) {
            Ok(decoded) => {
                let mut offset = 0;
                for c in decoded.chars() {
                    let width = c.len_utf8() * 3;
                    units.push((Some(c), &run[offset..offset + width]));
                    offset += width;
                }
            }
            Err(_) => units.extend((0..run.len()).step_by(3).map(|i| (None, &run[i..i + 3]))),
        }
        rest = tail;
    }

    units
}

/// Length of the run of `%XX` escapes at the start of `text`.
fn escaped_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut len = 0;
    while let [b'%', hi, lo, ..] = &bytes[len..] {
        if !(hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()) {
            break;
        }
        len += 3;
    }
    len
}
