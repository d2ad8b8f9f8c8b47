use crate::error::QueryError;
use crate::models::QueryParams;

pub const PARAM_RA: &str = "RA";
pub const PARAM_DEC: &str = "DEC";
pub const PARAM_SR: &str = "SR";

const NAME_SEPARATOR: char = '_';

/// Canonical name of a query plus the parameters sent with it. The name
/// doubles as the payload file stem, so it must stay a single path segment.
/// `_` only ever appears as the field separator, which keeps distinct
/// inputs on distinct names.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIdentity {
    pub name: String,
    pub params: QueryParams,
}

pub fn compute(
    base_name: &str,
    query_type: &str,
    ra_deg: f64,
    dec_deg: f64,
    radius_deg: f64,
) -> Result<QueryIdentity, QueryError> {
    validate_token("base_name", base_name)?;
    validate_token("query_type", query_type)?;
    if !ra_deg.is_finite() || !dec_deg.is_finite() {
        return Err(QueryError::validation(format!(
            "coordinates must be finite (ra={ra_deg}, dec={dec_deg})"
        )));
    }
    if !radius_deg.is_finite() || radius_deg <= 0.0 {
        return Err(QueryError::validation(format!(
            "radius must be a finite positive number of degrees, got {radius_deg}"
        )));
    }

    let params = QueryParams::new()
        .with(PARAM_RA, ra_deg)
        .with(PARAM_DEC, dec_deg)
        .with(PARAM_SR, radius_deg);
    // f64 Display is the shortest round-trip form and never uses an exponent.
    let name = format!("{base_name}_{query_type}_{ra_deg}_{dec_deg}_{radius_deg}");

    Ok(QueryIdentity { name, params })
}

fn validate_token(field: &str, value: &str) -> Result<(), QueryError> {
    if value.is_empty() {
        return Err(QueryError::validation(format!("{field} must not be empty")));
    }
    if let Some(bad) = value
        .chars()
        .find(|ch| matches!(ch, '/' | '\\') || ch.is_control() || ch.is_whitespace())
    {
        return Err(QueryError::validation(format!(
            "{field} contains a character not allowed in file names: {bad:?}"
        )));
    }
    if value.contains(NAME_SEPARATOR) {
        return Err(QueryError::validation(format!(
            "{field} must not contain `{NAME_SEPARATOR}`, it separates the name fields: {value:?}"
        )));
    }
    if value == "." || value == ".." {
        return Err(QueryError::validation(format!(
            "{field} must not be a relative path component"
        )));
    }
    Ok(())
}
