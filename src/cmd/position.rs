//! Allocator front end (`agentboard position`).

use anyhow::{Result, bail};

use agentboard::position::compute_insert_position;

pub fn cmd_position(positions: &[f64], index: usize) -> Result<()> {
    if positions.iter().any(|p| !p.is_finite()) {
        bail!("Positions must be finite numbers");
    }
    let mut sorted = positions.to_vec();
    sorted.sort_by(f64::total_cmp);
    println!("{}", compute_insert_position(&sorted, index));
    Ok(())
}
