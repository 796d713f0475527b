//! In-memory labeled arrays: named coordinates and variables over `ndarray`.
//!
//! Only the operations needed to standardize provider files and answer
//! day/range/instant queries are provided.

use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::NaiveDateTime;
use ndarray::{Array1, ArrayD, Axis, IxDyn, Zip, concatenate};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AncillaryError;
use crate::time::{self, EPOCH_UNITS};

pub type Attrs = BTreeMap<String, String>;

pub const TIME: &str = "time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

/// Tolerance used when comparing coordinate values.
const COORD_EPS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub values: Array1<f64>,
    pub attrs: Attrs,
}

impl Coordinate {
    pub fn new(values: impl Into<Array1<f64>>) -> Self {
        Self {
            values: values.into(),
            attrs: Attrs::new(),
        }
    }

    /// A time coordinate in seconds since the epoch.
    pub fn time(values: impl Into<Array1<f64>>) -> Self {
        Self::new(values).with_attr("units", EPOCH_UNITS)
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn matches(&self, other: &Coordinate) -> bool {
        self.len() == other.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| (a - b).abs() <= COORD_EPS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub attrs: Attrs,
}

impl Variable {
    pub fn new(dims: &[&str], data: ArrayD<f64>) -> Result<Self> {
        ensure!(
            dims.len() == data.ndim(),
            "{} dimension names given for a {}-dimensional array",
            dims.len(),
            data.ndim()
        );
        Ok(Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data,
            attrs: Attrs::new(),
        })
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").map(String::as_str)
    }

    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Elementwise combination with a variable laid out on the same dimensions.
    /// The result carries no attributes.
    pub fn zip_with(&self, other: &Variable, f: impl Fn(f64, f64) -> f64) -> Result<Variable> {
        ensure!(
            self.dims == other.dims && self.shape() == other.shape(),
            "cannot combine variables over {:?} {:?} and {:?} {:?}",
            self.dims,
            self.shape(),
            other.dims,
            other.shape()
        );
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|&a, &b| f(a, b));
        Ok(Variable {
            dims: self.dims.clone(),
            data,
            attrs: Attrs::new(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    coords: BTreeMap<String, Coordinate>,
    variables: BTreeMap<String, Variable>,
    pub attrs: Attrs,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of `dim`, from its coordinate or from any variable laid out on it.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.coords.get(dim).map(Coordinate::len).or_else(|| {
            self.variables
                .values()
                .find_map(|v| v.axis(dim).map(|ax| v.shape()[ax]))
        })
    }

    pub fn add_coord(&mut self, name: &str, coord: Coordinate) -> Result<()> {
        if let Some(len) = self
            .variables
            .values()
            .find_map(|v| v.axis(name).map(|ax| v.shape()[ax]))
        {
            ensure!(
                len == coord.len(),
                "coordinate {name} has {} values, variables have {len}",
                coord.len()
            );
        }
        self.coords.insert(name.to_string(), coord);
        Ok(())
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.get(name)
    }

    pub fn coord_names(&self) -> impl Iterator<Item = &str> {
        self.coords.keys().map(String::as_str)
    }

    pub fn remove_coord(&mut self, name: &str) -> Option<Coordinate> {
        self.coords.remove(name)
    }

    pub fn add_variable(&mut self, name: &str, var: Variable) -> Result<()> {
        for (dim, &len) in var.dims.iter().zip(var.shape()) {
            if let Some(expected) = self.dim_len(dim) {
                ensure!(
                    expected == len,
                    "{name}: dimension {dim} has length {len}, expected {expected}"
                );
            }
        }
        self.variables.insert(name.to_string(), var);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        self.variables.remove(name)
    }

    /// Renames a variable.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        ensure!(!self.variables.contains_key(to), "variable {to} already exists");
        let var = self
            .variables
            .remove(from)
            .ok_or_else(|| anyhow!("no variable {from} in dataset"))?;
        self.variables.insert(to.to_string(), var);
        Ok(())
    }

    /// Renames a dimension and its coordinate; a no-op when `from` is absent.
    pub fn rename_dim(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to || self.dim_len(from).is_none() {
            return Ok(());
        }
        ensure!(self.dim_len(to).is_none(), "dimension {to} already exists");
        if let Some(c) = self.coords.remove(from) {
            self.coords.insert(to.to_string(), c);
        }
        for var in self.variables.values_mut() {
            for d in var.dims.iter_mut().filter(|d| d.as_str() == from) {
                *d = to.to_string();
            }
        }
        Ok(())
    }

    /// A dataset holding only `names` and the coordinates they use.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Dataset> {
        let mut out = Dataset {
            attrs: self.attrs.clone(),
            ..Dataset::default()
        };
        for name in names {
            let name = name.as_ref();
            let var = self
                .variables
                .get(name)
                .ok_or_else(|| anyhow!("no variable {name} in dataset"))?;
            for dim in &var.dims {
                if let Some(c) = self.coords.get(dim) {
                    out.coords.entry(dim.clone()).or_insert_with(|| c.clone());
                }
            }
            out.variables.insert(name.to_string(), var.clone());
        }
        Ok(out)
    }

    /// Union of two datasets defined on the same coordinates.
    pub fn merge(mut self, other: Dataset) -> Result<Dataset> {
        for (name, coord) in other.coords {
            match self.coords.get(&name) {
                Some(existing) => ensure!(
                    existing.matches(&coord),
                    "coordinate {name} differs between merged datasets"
                ),
                None => self.add_coord(&name, coord)?,
            }
        }
        for (name, var) in other.variables {
            if let Some(existing) = self.variables.get(&name) {
                ensure!(existing == &var, "variable {name} differs between merged datasets");
                continue;
            }
            self.add_variable(&name, var)?;
        }
        for (k, v) in other.attrs {
            self.attrs.entry(k).or_insert(v);
        }
        Ok(self)
    }

    /// Merges datasets whose time axes may differ.
    ///
    /// The result lies on the union of the time axes; a variable holds NaN at
    /// the steps its own dataset lacks.
    pub fn merge_all(parts: Vec<Dataset>) -> Result<Dataset> {
        let mut times: Vec<f64> = parts
            .iter()
            .filter_map(Dataset::time_values)
            .flat_map(|t| t.iter().copied())
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup_by(|a, b| (*a - *b).abs() <= COORD_EPS);
        let aligned = parts
            .iter()
            .all(|p| p.time_values().is_none_or(|t| t.len() == times.len()));
        if !aligned {
            tracing::debug!("merging datasets on {} distinct time steps", times.len());
        }

        let mut merged: Option<Dataset> = None;
        for part in parts {
            let part = if aligned || part.time_values().is_none() {
                part
            } else {
                part.reindex_time(&times)?
            };
            merged = Some(match merged {
                None => part,
                Some(m) => m.merge(part)?,
            });
        }
        merged.ok_or_else(|| anyhow!("nothing to merge"))
    }

    /// Lays the dataset on `times`, NaN where its own time axis has no step.
    pub fn reindex_time(mut self, times: &[f64]) -> Result<Dataset> {
        let own = self
            .coords
            .remove(TIME)
            .ok_or_else(|| anyhow!("dataset has no time coordinate"))?;
        let source: Vec<Option<usize>> = times
            .iter()
            .map(|&t| own.values.iter().position(|&v| (v - t).abs() <= COORD_EPS))
            .collect();
        for var in self.variables.values_mut() {
            let Some(ax) = var.axis(TIME) else {
                continue;
            };
            let mut shape = var.shape().to_vec();
            shape[ax] = times.len();
            let mut data = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
            for (k, i) in source.iter().enumerate() {
                if let Some(i) = *i {
                    data.index_axis_mut(Axis(ax), k)
                        .assign(&var.data.index_axis(Axis(ax), i));
                }
            }
            var.data = data;
        }
        self.coords.insert(
            TIME.to_string(),
            Coordinate {
                values: Array1::from(times.to_vec()),
                attrs: own.attrs,
            },
        );
        Ok(self)
    }

    /// Keeps the positions along `dim` whose coordinate value satisfies `keep`.
    /// A dimension without coordinate is left untouched.
    pub fn retain_coord(&mut self, dim: &str, keep: impl Fn(f64) -> bool) {
        let Some(coord) = self.coords.get_mut(dim) else {
            return;
        };
        let index: Vec<usize> = (0..coord.len()).filter(|&i| keep(coord.values[i])).collect();
        if index.len() == coord.len() {
            return;
        }
        coord.values = coord.values.select(Axis(0), &index);
        for var in self.variables.values_mut() {
            if let Some(ax) = var.axis(dim) {
                var.data = var.data.select(Axis(ax), &index);
            }
        }
    }

    /// Concatenates datasets along `time`, in the given order.
    ///
    /// The parts must hold the same variables and share every other coordinate;
    /// the resulting time axis must be strictly increasing.
    pub fn concat_time(parts: Vec<Dataset>) -> Result<Dataset> {
        let mut parts = parts.into_iter();
        let first = parts.next().ok_or_else(|| anyhow!("nothing to concatenate"))?;
        let rest: Vec<Dataset> = parts.collect();
        if rest.is_empty() {
            return Ok(first);
        }
        let all: Vec<&Dataset> = std::iter::once(&first).chain(rest.iter()).collect();

        let mut times = Vec::new();
        for ds in &all {
            let t = ds
                .coord(TIME)
                .ok_or_else(|| anyhow!("cannot concatenate a dataset without a time coordinate"))?;
            times.extend(t.values.iter().copied());
        }
        time::ensure_increasing(&times)?;

        let mut out = Dataset {
            attrs: first.attrs.clone(),
            ..Dataset::default()
        };
        for (name, coord) in &first.coords {
            if name == TIME {
                continue;
            }
            for ds in &all[1..] {
                let same = ds.coord(name).is_some_and(|c| c.matches(coord));
                ensure!(same, "coordinate {name} differs between concatenated datasets");
            }
            out.coords.insert(name.clone(), coord.clone());
        }
        let time_attrs = first.coords[TIME].attrs.clone();
        out.coords.insert(
            TIME.to_string(),
            Coordinate {
                values: Array1::from(times),
                attrs: time_attrs,
            },
        );

        for ds in &all[1..] {
            if let Some(extra) = ds.variable_names().find(|n| !first.contains(n)) {
                bail!("variable {extra} is missing from the first concatenated dataset");
            }
        }
        for (name, var) in &first.variables {
            let Some(ax) = var.axis(TIME) else {
                out.variables.insert(name.clone(), var.clone());
                continue;
            };
            let mut views = Vec::with_capacity(all.len());
            for ds in &all {
                let v = ds
                    .variable(name)
                    .ok_or_else(|| anyhow!("variable {name} is missing from a concatenated dataset"))?;
                ensure!(v.dims == var.dims, "variable {name} changes layout between datasets");
                views.push(v.data.view());
            }
            let data = concatenate(Axis(ax), &views)
                .with_context(|| format!("cannot concatenate {name} along time"))?;
            out.variables.insert(
                name.clone(),
                Variable {
                    dims: var.dims.clone(),
                    data,
                    attrs: var.attrs.clone(),
                },
            );
        }
        Ok(out)
    }

    pub fn time_values(&self) -> Option<&Array1<f64>> {
        self.coord(TIME).map(|c| &c.values)
    }

    pub fn times(&self) -> Option<Vec<NaiveDateTime>> {
        self.time_values()
            .map(|v| v.iter().filter_map(|&s| time::from_seconds(s)).collect())
    }

    /// Linear interpolation in time.
    ///
    /// The `time` dimension is dropped from the result and the instant is
    /// recorded in the `time` attribute. An instant equal to a time step
    /// returns that step unchanged.
    pub fn interp_time(&self, at: NaiveDateTime) -> Result<Dataset> {
        let times = self
            .time_values()
            .ok_or_else(|| anyhow!("dataset has no time coordinate"))?;
        let t = time::to_seconds(at);

        let (i, j, w) = match times.iter().position(|&v| (v - t).abs() < COORD_EPS) {
            Some(i) => (i, i, 0.0),
            None => {
                let i = times
                    .iter()
                    .zip(times.iter().skip(1))
                    .position(|(&a, &b)| a < t && t < b)
                    .ok_or(AncillaryError::TimeOutOfRange(at))?;
                (i, i + 1, (t - times[i]) / (times[i + 1] - times[i]))
            }
        };

        let mut out = Dataset {
            attrs: self.attrs.clone(),
            ..Dataset::default()
        };
        out.attrs
            .insert(TIME.to_string(), at.format("%Y-%m-%dT%H:%M:%S").to_string());
        for (name, coord) in &self.coords {
            if name != TIME {
                out.coords.insert(name.clone(), coord.clone());
            }
        }
        for (name, var) in &self.variables {
            let Some(ax) = var.axis(TIME) else {
                out.variables.insert(name.clone(), var.clone());
                continue;
            };
            let a = var.data.index_axis(Axis(ax), i);
            let data = if i == j {
                a.to_owned()
            } else {
                let b = var.data.index_axis(Axis(ax), j);
                Zip::from(&a)
                    .and(&b)
                    .map_collect(|&x, &y| x * (1.0 - w) + y * w)
            };
            let mut dims = var.dims.clone();
            dims.remove(ax);
            out.variables.insert(
                name.clone(),
                Variable {
                    dims,
                    data,
                    attrs: var.attrs.clone(),
                },
            );
        }
        Ok(out)
    }

    /// Maps longitudes to `[-180, 180)`, sorted ascending; a global grid gets
    /// its `-180` column repeated at `180`. Grids already within `[-180, 180]`
    /// are only sorted, so a regional east edge at `180` stays there.
    pub fn wrap_longitude(&mut self) -> Result<()> {
        let Some(lon) = self.coords.get(LONGITUDE) else {
            return Ok(());
        };
        let attrs = lon.attrs.clone();
        let in_range = lon.values.iter().all(|v| (-180.0..=180.0).contains(v));
        let wrapped: Vec<f64> = lon
            .values
            .iter()
            .map(|&v| if in_range { v } else { (v + 180.0).rem_euclid(360.0) - 180.0 })
            .collect();
        if wrapped.is_empty() {
            return Ok(());
        }

        let mut order: Vec<usize> = (0..wrapped.len()).collect();
        order.sort_by(|&a, &b| wrapped[a].total_cmp(&wrapped[b]));
        order.dedup_by(|a, b| (wrapped[*a] - wrapped[*b]).abs() < COORD_EPS);
        let mut values: Vec<f64> = order.iter().map(|&i| wrapped[i]).collect();

        if values.len() >= 2 {
            let step = values[1] - values[0];
            let last = values[values.len() - 1];
            if step > 0.0 && (values[0] + 180.0).abs() < COORD_EPS && (last + step - 180.0).abs() < COORD_EPS {
                order.push(order[0]);
                values.push(180.0);
            }
        }

        for var in self.variables.values_mut() {
            if let Some(ax) = var.axis(LONGITUDE) {
                var.data = var.data.select(Axis(ax), &order);
            }
        }
        self.coords.insert(
            LONGITUDE.to_string(),
            Coordinate {
                values: Array1::from(values),
                attrs,
            },
        );
        Ok(())
    }

    /// Flattens forecast reference time × lead time into a single `time` axis.
    ///
    /// `reference` holds epoch seconds, `period` holds lead times in units of
    /// `period_seconds`. Variables laid out on only one of the two axes are dropped.
    /// Datasets without both coordinates are left untouched.
    pub fn stack_forecast_time(&mut self, reference: &str, period: &str, period_seconds: f64) -> Result<()> {
        let (Some(r), Some(p)) = (self.coords.get(reference), self.coords.get(period)) else {
            return Ok(());
        };
        let times: Vec<f64> = r
            .values
            .iter()
            .flat_map(|&t0| p.values.iter().map(move |&dt| t0 + dt * period_seconds))
            .collect();
        time::ensure_increasing(&times)?;
        let mut time_attrs = r.attrs.clone();
        time_attrs.insert("units".to_string(), EPOCH_UNITS.to_string());

        let names: Vec<String> = self.variables.keys().cloned().collect();
        for name in names {
            let var = &self.variables[&name];
            match (var.axis(reference), var.axis(period)) {
                (Some(ar), Some(ap)) => {
                    let stacked = stack_axes(var, ar, ap)
                        .with_context(|| format!("cannot stack forecast axes of {name}"))?;
                    self.variables.insert(name, stacked);
                }
                (None, None) => {}
                _ => {
                    tracing::debug!("dropping {name}: not laid out on both forecast axes");
                    self.variables.remove(&name);
                }
            }
        }

        self.coords.remove(reference);
        self.coords.remove(period);
        self.coords.insert(
            TIME.to_string(),
            Coordinate {
                values: Array1::from(times),
                attrs: time_attrs,
            },
        );
        Ok(())
    }
}

/// Moves axis `ap` right after `ar` and merges the pair into one `time` axis.
fn stack_axes(var: &Variable, ar: usize, ap: usize) -> Result<Variable> {
    let first = ar.min(ap);
    let mut order = Vec::with_capacity(var.dims.len());
    let mut shape = Vec::with_capacity(var.dims.len() - 1);
    let mut dims = Vec::with_capacity(var.dims.len() - 1);
    for ax in 0..var.dims.len() {
        if ax == first {
            order.extend([ar, ap]);
            shape.push(var.shape()[ar] * var.shape()[ap]);
            dims.push(TIME.to_string());
        } else if ax != ar && ax != ap {
            order.push(ax);
            shape.push(var.shape()[ax]);
            dims.push(var.dims[ax].clone());
        }
    }
    let data = var
        .data
        .view()
        .permuted_axes(order.as_slice())
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(shape.as_slice())?;
    Ok(Variable {
        dims,
        data,
        attrs: var.attrs.clone(),
    })
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dims: Vec<(&str, usize)> = Vec::new();
        let all_dims = self
            .coords
            .keys()
            .map(String::as_str)
            .chain(self.variables.values().flat_map(|v| v.dims.iter().map(String::as_str)));
        for d in all_dims {
            if !dims.iter().any(|(n, _)| *n == d) {
                dims.push((d, self.dim_len(d).unwrap_or(0)));
            }
        }
        let dims: Vec<String> = dims.iter().map(|(n, l)| format!("{n}: {l}")).collect();
        writeln!(f, "Dataset ({})", dims.join(", "))?;

        writeln!(f, "  coordinates:")?;
        for (name, c) in &self.coords {
            let (lo, hi) = match (c.values.first(), c.values.last()) {
                (Some(&lo), Some(&hi)) => (lo, hi),
                _ => (f64::NAN, f64::NAN),
            };
            if name == TIME {
                writeln!(f, "    {name} [{} .. {}]", time::format_seconds(lo), time::format_seconds(hi))?;
            } else {
                writeln!(f, "    {name} [{lo} .. {hi}]")?;
            }
        }
        writeln!(f, "  variables:")?;
        for (name, v) in &self.variables {
            let units = v.units().unwrap_or("-");
            writeln!(f, "    {name} ({}) {units}", v.dims.join(", "))?;
        }
        if !self.attrs.is_empty() {
            writeln!(f, "  attributes:")?;
            for (k, v) in &self.attrs {
                writeln!(f, "    {k}: {v}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::{ArrayD, IxDyn, array};

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 11, 30)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    /// time × latitude × longitude dataset whose values equal the time index.
    fn grid(hours: &[u32], lons: &[f64]) -> Dataset {
        let mut ds = Dataset::new();
        let t: Vec<f64> = hours.iter().map(|&h| time::to_seconds(hour(h))).collect();
        ds.add_coord(TIME, Coordinate::time(t)).unwrap();
        ds.add_coord(LATITUDE, Coordinate::new(vec![10.0, 0.0])).unwrap();
        ds.add_coord(LONGITUDE, Coordinate::new(lons.to_vec())).unwrap();
        let data = ArrayD::from_shape_fn(IxDyn(&[hours.len(), 2, lons.len()]), |idx| {
            hours[idx[0]] as f64 * 10.0 + lons[idx[2]] / 1000.0
        });
        let var = Variable::new(&[TIME, LATITUDE, LONGITUDE], data)
            .unwrap()
            .with_attr("units", "K");
        ds.add_variable("t2m", var).unwrap();
        ds
    }

    #[test]
    fn shapes_are_checked() {
        let mut ds = grid(&[0, 1], &[0.0, 90.0]);
        let bad = Variable::new(&[TIME], ArrayD::zeros(IxDyn(&[3]))).unwrap();
        assert!(ds.add_variable("bad", bad).is_err());
        assert!(Variable::new(&[TIME, LATITUDE], ArrayD::zeros(IxDyn(&[2]))).is_err());
        assert!(ds.add_coord(LATITUDE, Coordinate::new(vec![1.0])).is_err());
    }

    #[test]
    fn interpolation_is_linear_between_steps() {
        let ds = grid(&[0, 1, 2], &[0.0]);
        let at = hour(1) + chrono::Duration::minutes(15);
        let out = ds.interp_time(at).unwrap();
        let v = out.variable("t2m").unwrap();
        assert_eq!(v.dims, vec![LATITUDE, LONGITUDE]);
        assert!((v.data[[0, 0]] - 12.5).abs() < 1e-9);
        assert!(out.coord(TIME).is_none());
        assert_eq!(out.attrs[TIME], "2022-11-30T01:15:00");
        assert_eq!(v.units(), Some("K"));
    }

    #[test]
    fn interpolation_is_exact_on_steps() {
        let ds = grid(&[0, 1, 2], &[0.0]);
        let out = ds.interp_time(hour(2)).unwrap();
        assert_eq!(out.variable("t2m").unwrap().data[[1, 0]], 20.0);
        let out = ds.interp_time(hour(0)).unwrap();
        assert_eq!(out.variable("t2m").unwrap().data[[0, 0]], 0.0);
    }

    #[test]
    fn interpolation_outside_coverage() {
        let ds = grid(&[0, 1], &[0.0]);
        let err = ds.interp_time(hour(3)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AncillaryError>(),
            Some(AncillaryError::TimeOutOfRange(_))
        ));
    }

    #[test]
    fn concat_along_time() {
        let a = grid(&[0, 1], &[0.0, 90.0]);
        let b = grid(&[2, 3], &[0.0, 90.0]);
        let ds = Dataset::concat_time(vec![a.clone(), b]).unwrap();
        assert_eq!(ds.dim_len(TIME), Some(4));
        assert_eq!(ds.variable("t2m").unwrap().data[[3, 0, 0]], 30.0);
        assert_eq!(ds.times().unwrap()[2], hour(2));

        assert!(Dataset::concat_time(vec![a.clone(), a.clone()]).is_err());
        let other_grid = grid(&[5], &[0.0, 45.0]);
        assert!(Dataset::concat_time(vec![a, other_grid]).is_err());
    }

    #[test]
    fn merge_and_select() {
        let a = grid(&[0, 1], &[0.0]);
        let mut b = Dataset::new();
        b.add_coord(TIME, a.coord(TIME).unwrap().clone()).unwrap();
        b.add_variable("tp", Variable::new(&[TIME], array![1.0, 2.0].into_dyn()).unwrap())
            .unwrap();
        let merged = a.clone().merge(b).unwrap();
        assert_eq!(merged.variable_names().collect::<Vec<_>>(), ["t2m", "tp"]);

        let only_tp = merged.select(&["tp"]).unwrap();
        assert!(!only_tp.contains("t2m"));
        assert!(only_tp.coord(LONGITUDE).is_none());
        assert!(merged.select(&["nope"]).is_err());

        let mut shifted = grid(&[0, 1], &[0.0]);
        shifted.rename("t2m", "skt").unwrap();
        shifted.add_coord(LATITUDE, Coordinate::new(vec![5.0, 0.0])).unwrap();
        assert!(a.merge(shifted).is_err());
    }

    #[test]
    fn renames() {
        let mut ds = grid(&[0], &[0.0]);
        ds.rename("t2m", "air_temperature_2m").unwrap();
        assert!(ds.contains("air_temperature_2m"));
        assert!(ds.rename("t2m", "x").is_err());

        ds.rename_dim(LATITUDE, "lat").unwrap();
        assert!(ds.coord("lat").is_some());
        assert_eq!(ds.variable("air_temperature_2m").unwrap().dims[1], "lat");
        ds.rename_dim("missing", "x").unwrap();
    }

    #[test]
    fn longitude_wrap_of_a_global_grid() {
        let lons: Vec<f64> = (0..4).map(|i| i as f64 * 90.0).collect();
        let mut ds = grid(&[0], &lons);
        ds.wrap_longitude().unwrap();
        let lon = &ds.coord(LONGITUDE).unwrap().values;
        assert_eq!(lon.to_vec(), vec![-180.0, -90.0, 0.0, 90.0, 180.0]);
        let v = ds.variable("t2m").unwrap();
        // columns follow their longitudes; 180 repeats -180 (originally 180)
        assert_eq!(v.data[[0, 0, 0]], 0.18);
        assert_eq!(v.data[[0, 0, 1]], 0.27);
        assert_eq!(v.data[[0, 0, 2]], 0.0);
        assert_eq!(v.data[[0, 0, 4]], 0.18);
    }

    #[test]
    fn longitude_wrap_of_a_regional_grid() {
        let mut ds = grid(&[0], &[350.0, 355.0, 0.0, 5.0]);
        ds.wrap_longitude().unwrap();
        let lon = &ds.coord(LONGITUDE).unwrap().values;
        assert_eq!(lon.to_vec(), vec![-10.0, -5.0, 0.0, 5.0]);

        let mut dup = grid(&[0], &[-180.0, 0.0, 180.0]);
        dup.wrap_longitude().unwrap();
        assert_eq!(dup.coord(LONGITUDE).unwrap().values.to_vec(), vec![-180.0, 0.0, 180.0]);
    }

    #[test]
    fn longitude_wrap_keeps_an_east_edge_at_180() {
        let mut ds = grid(&[0], &[170.0, 175.0, 180.0]);
        ds.wrap_longitude().unwrap();
        assert_eq!(ds.coord(LONGITUDE).unwrap().values.to_vec(), vec![170.0, 175.0, 180.0]);
        let v = ds.variable("t2m").unwrap();
        assert_eq!(v.data[[0, 0, 2]], 0.18);
    }

    #[test]
    fn merge_of_offset_time_axes() {
        let hourly = grid(&[0, 1, 2], &[0.0]);
        let mut half = Dataset::new();
        let t: Vec<f64> = [0, 1].iter().map(|&h| time::to_seconds(hour(h)) + 1800.0).collect();
        half.add_coord(TIME, Coordinate::time(t)).unwrap();
        half.add_variable("tqv", Variable::new(&[TIME], array![5.0, 7.0].into_dyn()).unwrap())
            .unwrap();

        assert!(hourly.clone().merge(half.clone()).is_err());
        let ds = Dataset::merge_all(vec![hourly, half]).unwrap();
        assert_eq!(ds.dim_len(TIME), Some(5));
        assert_eq!(ds.times().unwrap()[1], hour(0) + chrono::Duration::minutes(30));

        let tqv = ds.variable("tqv").unwrap();
        assert!(tqv.data[[0]].is_nan());
        assert_eq!(tqv.data[[1]], 5.0);
        assert_eq!(tqv.data[[3]], 7.0);
        let t2m = ds.variable("t2m").unwrap();
        assert_eq!(t2m.data[[2, 0, 0]], 10.0);
        assert!(t2m.data[[1, 0, 0]].is_nan());
    }

    #[test]
    fn merge_all_of_aligned_parts_is_a_plain_merge() {
        let a = grid(&[0, 1], &[0.0]);
        let mut b = Dataset::new();
        b.add_coord(TIME, a.coord(TIME).unwrap().clone()).unwrap();
        b.add_variable("tp", Variable::new(&[TIME], array![1.0, 2.0].into_dyn()).unwrap())
            .unwrap();
        let ds = Dataset::merge_all(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(ds, a.merge(b).unwrap());
    }

    #[test]
    fn coordinates_are_retained_by_value() {
        let mut ds = grid(&[0], &[0.0, 90.0, 180.0, 270.0]);
        ds.retain_coord(LONGITUDE, |v| (80.0..=190.0).contains(&v));
        ds.retain_coord(LATITUDE, |v| v > 5.0);
        ds.retain_coord("missing", |_| false);
        assert_eq!(ds.coord(LONGITUDE).unwrap().values.to_vec(), vec![90.0, 180.0]);
        let v = ds.variable("t2m").unwrap();
        assert_eq!(v.shape(), [1, 1, 2]);
        assert_eq!(v.data[[0, 0, 1]], 0.18);
    }

    #[test]
    fn forecast_axes_are_stacked() {
        let mut ds = Dataset::new();
        let base = time::to_seconds(hour(0));
        ds.add_coord("forecast_reference_time", Coordinate::new(vec![base, base + 12.0 * 3600.0]))
            .unwrap();
        ds.add_coord("forecast_period", Coordinate::new(vec![0.0, 1.0, 2.0]))
            .unwrap();
        ds.add_coord(LATITUDE, Coordinate::new(vec![0.0])).unwrap();
        // value = reference index * 100 + lead hours
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 2, 1]), |i| (i[1] * 100 + i[0]) as f64);
        let var = Variable::new(&["forecast_period", "forecast_reference_time", LATITUDE], data).unwrap();
        ds.add_variable("aod550", var).unwrap();
        let partial = Variable::new(&["forecast_period"], ArrayD::zeros(IxDyn(&[3]))).unwrap();
        ds.add_variable("lead_only", partial).unwrap();

        ds.stack_forecast_time("forecast_reference_time", "forecast_period", 3600.0)
            .unwrap();
        let v = ds.variable("aod550").unwrap();
        assert_eq!(v.dims, vec![TIME, LATITUDE]);
        let flat: Vec<f64> = v.data.iter().copied().collect();
        assert_eq!(flat, vec![0.0, 1.0, 2.0, 100.0, 101.0, 102.0]);
        let times = ds.times().unwrap();
        assert_eq!(times[1], hour(1));
        assert_eq!(times[3], hour(12));
        assert!(!ds.contains("lead_only"));
        assert!(ds.coord("forecast_period").is_none());
    }

    #[test]
    fn display_summary() {
        let ds = grid(&[0, 1], &[0.0]);
        let s = ds.to_string();
        assert!(s.contains("time: 2"));
        assert!(s.contains("t2m (time, latitude, longitude) K"));
        assert!(s.contains("2022-11-30T00:00:00"));
    }
}
