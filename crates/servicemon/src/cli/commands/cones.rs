use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::cone::{Cone, generate_random};

#[derive(Debug, Clone, Args)]
pub struct ConesArgs {
    #[arg(long, default_value_t = 5)]
    pub count: usize,

    #[arg(long, default_value_t = 0.1)]
    pub min_radius: f64,

    #[arg(long, default_value_t = 1.2)]
    pub max_radius: f64,

    /// Fixes the sequence; otherwise seeded from the OS.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(args: &ConesArgs) -> Result<()> {
    let cones = draw(args)?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(render_cones(&cones).as_bytes())
        .context("failed to write cones to stdout")?;
    stdout.flush().context("failed to flush stdout")
}

pub fn draw(args: &ConesArgs) -> Result<Vec<Cone>> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Ok(generate_random(
        &mut rng,
        args.count,
        args.min_radius,
        args.max_radius,
    )?)
}

#[must_use]
pub fn render_cones(cones: &[Cone]) -> String {
    let mut rendered = String::from("ra_deg,dec_deg,radius_deg\n");
    for cone in cones {
        rendered.push_str(&format!(
            "{},{},{}\n",
            cone.position.ra_deg, cone.position.dec_deg, cone.radius_deg
        ));
    }
    rendered
}
