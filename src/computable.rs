//! Variables derived from downloaded ones.
//!
//! A computable appears in a nomenclature table with a `#`-prefixed short name.
//! Its inputs are canonical names, resolved against the provider's table, so
//! one definition serves every provider that carries the inputs.

use anyhow::{Result, ensure};

use crate::dataset::Variable;

pub struct Computable {
    pub short_name: &'static str,
    pub long_name: &'static str,
    /// Canonical names of the inputs, in the order `compute` expects them.
    pub inputs: &'static [&'static str],
    compute: fn(&[&Variable]) -> Result<Variable>,
}

impl std::fmt::Debug for Computable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computable")
            .field("short_name", &self.short_name)
            .field("inputs", &self.inputs)
            .finish()
    }
}

const COMPUTABLES: &[Computable] = &[
    Computable {
        short_name: "#windspeed",
        long_name: "10 metre wind speed",
        inputs: &["eastward_wind_10m", "northward_wind_10m"],
        compute: wind_speed,
    },
    Computable {
        short_name: "#angstrom",
        long_name: "Angstrom exponent between 469 and 670 nm",
        inputs: &[
            "total_aerosol_optical_thickness_469nm",
            "total_aerosol_optical_thickness_670nm",
        ],
        compute: angstrom_469_670,
    },
];

pub fn builtin() -> &'static [Computable] {
    COMPUTABLES
}

pub fn lookup(short_name: &str) -> Option<&'static Computable> {
    COMPUTABLES.iter().find(|c| c.short_name == short_name)
}

impl Computable {
    /// Computes the variable from `(canonical name, variable)` pairs given in
    /// `inputs` order, recording provenance in `computed_from` and `long_name`.
    pub fn evaluate(&self, inputs: &[(&str, &Variable)]) -> Result<Variable> {
        ensure!(
            inputs.len() == self.inputs.len()
                && inputs.iter().zip(self.inputs).all(|((n, _), want)| n == want),
            "{} needs {:?}",
            self.short_name,
            self.inputs
        );
        let vars: Vec<&Variable> = inputs.iter().map(|(_, v)| *v).collect();
        Ok((self.compute)(&vars)?
            .with_attr("long_name", self.long_name)
            .with_attr("computed_from", &self.inputs.join(",")))
    }
}

fn wind_speed(v: &[&Variable]) -> Result<Variable> {
    v[0].zip_with(v[1], f64::hypot)
}

fn angstrom_469_670(v: &[&Variable]) -> Result<Variable> {
    let ratio = (469.0_f64 / 670.0).ln();
    v[0].zip_with(v[1], |t469, t670| -(t469 / t670).ln() / ratio)
}
