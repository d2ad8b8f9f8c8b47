use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::utils::html;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPosition {
    /// Wraps RA into `[0, 360)` and rejects declinations off the sphere.
    pub fn new(ra_deg: f64, dec_deg: f64) -> Result<Self, QueryError> {
        if !ra_deg.is_finite() || !dec_deg.is_finite() {
            return Err(QueryError::validation(format!(
                "coordinates must be finite (ra={ra_deg}, dec={dec_deg})"
            )));
        }
        if !(-90.0..=90.0).contains(&dec_deg) {
            return Err(QueryError::validation(format!(
                "declination {dec_deg} is outside [-90, 90]"
            )));
        }
        let ra_deg = ra_deg.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs.
        let ra_deg = if ra_deg >= 360.0 { 0.0 } else { ra_deg };
        Ok(Self { ra_deg, dec_deg })
    }
}

/// Where a service lives: a bare URL, or a registry-style record whose
/// access URL may be missing or HTML-escaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceDescriptor {
    Url(String),
    Record(ServiceRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(default)]
    pub access_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A service together with the labels its queries are named by.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTarget {
    pub base_name: String,
    pub query_type: String,
    pub descriptor: ServiceDescriptor,
}

impl ServiceTarget {
    #[must_use]
    pub fn from_url(base_name: &str, query_type: &str, url: &str) -> Self {
        Self {
            base_name: base_name.to_string(),
            query_type: query_type.to_string(),
            descriptor: ServiceDescriptor::Url(url.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionDescriptor {
    Pair(f64, f64),
    Text(String),
    Resolved(SkyPosition),
}

impl fmt::Display for PositionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair(ra, dec) => write!(f, "({ra}, {dec})"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Resolved(position) => write!(f, "({}, {})", position.ra_deg, position.dec_deg),
        }
    }
}

pub trait CoordinateResolver: Send + Sync {
    /// Turns a free-form position into decimal degrees. Fails with a
    /// validation error when the text cannot be understood.
    fn resolve(&self, text: &str) -> Result<SkyPosition, QueryError>;
}

/// Decimal-degree and sexagesimal positions; no name lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCoordinateResolver;

impl CoordinateResolver for DefaultCoordinateResolver {
    fn resolve(&self, text: &str) -> Result<SkyPosition, QueryError> {
        parse_position(text)
    }
}

pub fn resolve_access_url(descriptor: &ServiceDescriptor) -> Result<String, QueryError> {
    let raw = match descriptor {
        ServiceDescriptor::Url(url) => url.as_str(),
        ServiceDescriptor::Record(record) => record
            .access_url
            .as_deref()
            .ok_or_else(|| QueryError::configuration("service record has no access_url"))?,
    };
    let access_url = html::unescape(raw.trim());
    if access_url.is_empty() {
        return Err(QueryError::configuration("access_url is empty"));
    }
    let lower = access_url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(QueryError::configuration(format!(
            "access_url must be an http(s) URL: {access_url}"
        )));
    }
    Ok(access_url)
}

pub fn resolve_position(
    descriptor: &PositionDescriptor,
    resolver: &dyn CoordinateResolver,
) -> Result<SkyPosition, QueryError> {
    let resolved = match descriptor {
        PositionDescriptor::Pair(ra, dec) => resolver.resolve(&format!("{ra} {dec}")),
        PositionDescriptor::Text(text) => resolver.resolve(text),
        PositionDescriptor::Resolved(position) => {
            SkyPosition::new(position.ra_deg, position.dec_deg)
        }
    };
    resolved.map_err(|error| {
        QueryError::configuration(format!("cannot resolve position {descriptor}: {error}"))
    })
}

pub fn parse_position(text: &str) -> Result<SkyPosition, QueryError> {
    let cleaned = text.replace(',', " ");
    let tokens = cleaned.split_whitespace().collect::<Vec<_>>();
    match tokens.as_slice() {
        [ra, dec] => {
            if let (Some(ra), Some(dec)) = (parse_decimal_degrees(ra), parse_decimal_degrees(dec)) {
                return SkyPosition::new(ra, dec);
            }
            let ra = parse_hours(ra)?;
            let dec = parse_sexagesimal_degrees(dec)?;
            SkyPosition::new(ra, dec)
        }
        [rh, rm, rs, dd, dm, ds] => {
            let ra = parse_hours(&format!("{rh}:{rm}:{rs}"))?;
            let dec = parse_sexagesimal_degrees(&format!("{dd}:{dm}:{ds}"))?;
            SkyPosition::new(ra, dec)
        }
        [] => Err(QueryError::validation("position is empty")),
        _ => Err(QueryError::validation(format!(
            "cannot parse position {text:?}; expected `ra dec` in degrees or sexagesimal"
        ))),
    }
}

fn parse_decimal_degrees(token: &str) -> Option<f64> {
    let trimmed = token
        .strip_suffix("deg")
        .or_else(|| token.strip_suffix('d'))
        .unwrap_or(token);
    trimmed.parse::<f64>().ok()
}

fn parse_hours(token: &str) -> Result<f64, QueryError> {
    let captures = hours_regex()
        .captures(token)
        .ok_or_else(|| QueryError::validation(format!("cannot parse right ascension {token:?}")))?;
    let hours = parse_component(&captures[1], token)?;
    let minutes = parse_component(&captures[2], token)?;
    let seconds = parse_component(&captures[3], token)?;
    if hours >= 24.0 || minutes >= 60.0 || seconds >= 60.0 {
        return Err(QueryError::validation(format!(
            "right ascension out of range: {token:?}"
        )));
    }
    Ok((hours + minutes / 60.0 + seconds / 3600.0) * 15.0)
}

fn parse_sexagesimal_degrees(token: &str) -> Result<f64, QueryError> {
    let captures = degrees_regex()
        .captures(token)
        .ok_or_else(|| QueryError::validation(format!("cannot parse declination {token:?}")))?;
    let sign = if &captures[1] == "-" { -1.0 } else { 1.0 };
    let degrees = parse_component(&captures[2], token)?;
    let minutes = parse_component(&captures[3], token)?;
    let seconds = parse_component(&captures[4], token)?;
    if minutes >= 60.0 || seconds >= 60.0 {
        return Err(QueryError::validation(format!(
            "declination out of range: {token:?}"
        )));
    }
    Ok(sign * (degrees + minutes / 60.0 + seconds / 3600.0))
}

fn parse_component(raw: &str, token: &str) -> Result<f64, QueryError> {
    raw.parse::<f64>()
        .map_err(|_| QueryError::validation(format!("invalid sexagesimal component in {token:?}")))
}

fn hours_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[h:](\d{1,2})[m:](\d{1,2}(?:\.\d*)?)s?$")
            .expect("hours regex should compile")
    })
}

fn degrees_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"^([+-]?)(\d{1,2})[d:°](\d{1,2})[m:'](\d{1,2}(?:\.\d*)?)(?:s|")?$"#)
            .expect("degrees regex should compile")
    })
}
