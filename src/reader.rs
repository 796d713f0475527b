//! Decoding downloaded files into [`Dataset`]s.

use anyhow::Result;
use std::path::Path;

use crate::dataset::Dataset;

/// Opens a cached file as a [`Dataset`].
pub trait DatasetReader {
    fn open(&self, path: &Path) -> Result<Dataset>;
}

/// CF packing attributes of a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub scale_factor: f64,
    pub add_offset: f64,
    /// `_FillValue` and `missing_value`, compared against the packed values.
    pub fill_values: Vec<f64>,
}

impl Default for Packing {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            add_offset: 0.0,
            fill_values: Vec::new(),
        }
    }
}

impl Packing {
    /// Unpacks in place: fill values become NaN, others `v * scale_factor + add_offset`.
    pub fn apply(&self, values: &mut [f64]) {
        let identity = self.scale_factor == 1.0 && self.add_offset == 0.0;
        if identity && self.fill_values.is_empty() {
            return;
        }
        for v in values.iter_mut() {
            if self.fill_values.iter().any(|f| f == v) {
                *v = f64::NAN;
            } else if !identity {
                *v = *v * self.scale_factor + self.add_offset;
            }
        }
    }
}

#[cfg(feature = "netcdf")]
pub use self::nc::NetcdfReader;

#[cfg(feature = "netcdf")]
mod nc {
    use anyhow::{Context, Result};
    use ndarray::{ArrayD, IxDyn};
    use netcdf::AttributeValue;
    use std::path::Path;

    use super::{DatasetReader, Packing};
    use crate::dataset::{Attrs, Coordinate, Dataset, Variable};
    use crate::time::{self, EPOCH_UNITS};

    /// Reads NetCDF-3/4 files through libnetcdf.
    ///
    /// Every numeric variable is read as `f64` and unpacked; one-dimensional
    /// variables named after their dimension become coordinates, and
    /// coordinates with CF time units are decoded to epoch seconds.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NetcdfReader;

    impl DatasetReader for NetcdfReader {
        fn open(&self, path: &Path) -> Result<Dataset> {
            let file = netcdf::open(path)
                .with_context(|| format!("failed to open NetCDF file {}", path.display()))?;

            let mut ds = Dataset::new();
            for attr in file.attributes() {
                if let Ok(value) = attr.value() {
                    ds.attrs.insert(attr.name().to_string(), attr_to_string(&value));
                }
            }

            let mut variables = Vec::new();
            for var in file.variables() {
                let name = var.name();
                let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
                let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

                let mut values = match var.get_values::<f64, _>(..) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!("skipping {name} in {}: {e}", path.display());
                        continue;
                    }
                };

                let mut attrs = Attrs::new();
                let mut packing = Packing::default();
                for attr in var.attributes() {
                    let Ok(value) = attr.value() else { continue };
                    match attr.name() {
                        "scale_factor" => packing.scale_factor = attr_to_f64(&value).unwrap_or(1.0),
                        "add_offset" => packing.add_offset = attr_to_f64(&value).unwrap_or(0.0),
                        "_FillValue" | "missing_value" => packing.fill_values.extend(attr_to_f64(&value)),
                        other => {
                            attrs.insert(other.to_string(), attr_to_string(&value));
                        }
                    }
                }
                packing.apply(&mut values);

                if dims.len() == 1 && dims[0] == name {
                    if let Some(units) = attrs.get("units").filter(|u| u.contains(" since ")) {
                        values = time::decode_cf_time(&values, units)
                            .with_context(|| format!("failed to decode {name} in {}", path.display()))?;
                        attrs.insert("units".to_string(), EPOCH_UNITS.to_string());
                    }
                    ds.add_coord(&name, Coordinate { values: values.into(), attrs })?;
                } else {
                    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
                        .with_context(|| format!("bad shape for {name} in {}", path.display()))?;
                    variables.push((name, Variable { dims, data, attrs }));
                }
            }

            for (name, var) in variables {
                ds.add_variable(&name, var)
                    .with_context(|| format!("inconsistent variable in {}", path.display()))?;
            }
            Ok(ds)
        }
    }

    fn attr_to_f64(value: &AttributeValue) -> Option<f64> {
        match value {
            AttributeValue::Uchar(v) => Some(f64::from(*v)),
            AttributeValue::Schar(v) => Some(f64::from(*v)),
            AttributeValue::Short(v) => Some(f64::from(*v)),
            AttributeValue::Ushort(v) => Some(f64::from(*v)),
            AttributeValue::Int(v) => Some(f64::from(*v)),
            AttributeValue::Uint(v) => Some(f64::from(*v)),
            AttributeValue::Longlong(v) => Some(*v as f64),
            AttributeValue::Ulonglong(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(f64::from(*v)),
            AttributeValue::Double(v) => Some(*v),
            AttributeValue::Floats(v) => v.first().map(|x| f64::from(*x)),
            AttributeValue::Doubles(v) => v.first().copied(),
            AttributeValue::Shorts(v) => v.first().map(|x| f64::from(*x)),
            AttributeValue::Ints(v) => v.first().map(|x| f64::from(*x)),
            _ => None,
        }
    }

    fn attr_to_string(value: &AttributeValue) -> String {
        match value {
            AttributeValue::Str(s) => s.clone(),
            AttributeValue::Strs(s) => s.join(", "),
            other => attr_to_f64(other)
                .map(|v| v.to_string())
                .unwrap_or_else(|| format!("{other:?}")),
        }
    }
}
