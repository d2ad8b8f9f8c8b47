use std::f64::consts::PI;

use rand::Rng;

use crate::error::QueryError;
use crate::resolve::SkyPosition;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub position: SkyPosition,
    pub radius_deg: f64,
}

/// A point drawn uniformly over the whole sphere.
pub fn random_position<R: Rng>(rng: &mut R) -> SkyPosition {
    let ra_rad = 2.0 * PI * rng.random::<f64>();
    let dec_rad = (2.0 * (rng.random::<f64>() - 0.5)).asin();
    SkyPosition {
        ra_deg: ra_rad.to_degrees().rem_euclid(360.0),
        dec_deg: dec_rad.to_degrees(),
    }
}

pub fn random_cone<R: Rng>(
    rng: &mut R,
    min_radius: f64,
    max_radius: f64,
) -> Result<Cone, QueryError> {
    validate_radius_range(min_radius, max_radius)?;
    Ok(draw_cone(rng, min_radius, max_radius))
}

pub fn generate_random<R: Rng>(
    rng: &mut R,
    count: usize,
    min_radius: f64,
    max_radius: f64,
) -> Result<Vec<Cone>, QueryError> {
    validate_radius_range(min_radius, max_radius)?;
    if count == 0 {
        return Err(QueryError::validation("cone count must be a positive number"));
    }
    Ok((0..count)
        .map(|_| draw_cone(rng, min_radius, max_radius))
        .collect())
}

fn draw_cone<R: Rng>(rng: &mut R, min_radius: f64, max_radius: f64) -> Cone {
    let position = random_position(rng);
    let radius_deg = (max_radius - min_radius) * rng.random::<f64>() + min_radius;
    Cone {
        position,
        radius_deg,
    }
}

fn validate_radius_range(min_radius: f64, max_radius: f64) -> Result<(), QueryError> {
    if !(min_radius.is_finite() && max_radius.is_finite() && 0.0 <= min_radius && min_radius < max_radius) {
        return Err(QueryError::validation(format!(
            "min_radius must be in the range [0, max_radius), got min={min_radius} max={max_radius}"
        )));
    }
    Ok(())
}
