//! MERRA-2 product catalog: which product holds which variable.
//!
//! A catalog ships with the crate; a fresh one can be scraped from the GES DISC
//! OPeNDAP server and memoized in a JSON file.

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cache::cache_json;
use crate::earthdata::EarthdataSession;
use crate::error::AncillaryError;
use crate::merra2::stream_number;
use crate::util::urljoin;

const BUILTIN: &str = include_str!("../data/merra2.json");

/// Coordinates listed alongside the variables of every product.
const COORDINATES: [&str; 3] = ["lat", "lon", "time"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Short product name, e.g. `M2T1NXSLV`.
    pub name: String,
    pub version: String,
    /// Collection part of the file names, e.g. `tavg1_2d_slv_Nx`.
    pub collection: String,
    pub variables: Vec<String>,
}

impl ProductSpec {
    /// `MERRA2_{stream}.{collection}.{YYYYMMDD}.nc4`
    pub fn file_name(&self, day: NaiveDate) -> String {
        format!(
            "MERRA2_{}.{}.{}.nc4",
            stream_number(day),
            self.collection,
            day.format("%Y%m%d")
        )
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    products: Vec<ProductSpec>,
}

impl Catalog {
    pub fn builtin() -> Result<Self> {
        serde_json::from_str(BUILTIN).context("invalid builtin MERRA-2 catalog")
    }

    pub fn from_products(products: Vec<ProductSpec>) -> Self {
        Self { products }
    }

    pub fn products(&self) -> &[ProductSpec] {
        &self.products
    }

    pub fn product(&self, name: &str) -> Result<&ProductSpec, AncillaryError> {
        self.products
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AncillaryError::UnknownProduct(name.to_string()))
    }

    /// Products holding `variable`, in catalog order.
    pub fn products_with<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a ProductSpec> + 'a {
        self.products.iter().filter(move |p| p.contains(variable))
    }

    /// Reads the catalog memoized at `path`, scraping the server when the file is missing.
    pub fn load_or_scrape(path: &Path, session: &EarthdataSession, base_url: &str) -> Result<Self> {
        cache_json(path, || {
            tracing::info!("scraping the MERRA-2 catalog from {base_url}");
            Self::scrape(session, base_url, NaiveDate::from_ymd_opt(2012, 12, 12).unwrap_or_default())
        })
    }

    /// Lists every product of the OPeNDAP root, then the collection and
    /// variables of its file for `sample_day`.
    pub fn scrape(session: &EarthdataSession, base_url: &str, sample_day: NaiveDate) -> Result<Self> {
        let root = session.get_text(base_url)?;
        let dirs = parse_product_dirs(&root)?;
        let mut products = Vec::with_capacity(dirs.len());
        for (i, (name, version)) in dirs.iter().enumerate() {
            tracing::info!("parsing MERRA-2 products [{}/{}] {name}", i + 1, dirs.len());
            let month_url = urljoin(base_url, &format!("{name}.{version}/{}/", sample_day.format("%Y/%m")));
            let listing = session.get_text(&month_url)?;
            let file = parse_file_names(&listing)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no MERRA-2 file listed in {month_url}"))?;
            let collection = file
                .split('.')
                .nth(1)
                .ok_or_else(|| anyhow!("unexpected MERRA-2 file name {file}"))?
                .to_string();
            let dds = session.get_text(&format!("{}.dds", urljoin(&month_url, &file)))?;
            products.push(ProductSpec {
                name: name.clone(),
                version: version.clone(),
                collection,
                variables: parse_dds_variables(&dds)?,
            });
        }
        Ok(Self { products })
    }
}

/// `(product, version)` of every `M2…` directory in an OPeNDAP listing.
pub(crate) fn parse_product_dirs(html: &str) -> Result<Vec<(String, String)>> {
    // <a href="M2T1NXSLV.5.12.4/contents.html">M2T1NXSLV.5.12.4/</a>
    let re = Regex::new(r#"href="(M2[A-Z0-9]+)\.(\d+(?:\.\d+)*)/"#)?;
    Ok(re
        .captures_iter(html)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect())
}

/// Names of the `MERRA2_…` files in a month listing.
pub(crate) fn parse_file_names(html: &str) -> Result<Vec<String>> {
    // each file is listed with .html and .dmr links
    let re = Regex::new(r#"href="(?:[^"]*/)?(MERRA2_\d{3}\.\w+\.\d{8}\.nc4)(?:\.html|\.dmr)?""#)?;
    let mut names: Vec<String> = re.captures_iter(html).map(|cap| cap[1].to_string()).collect();
    names.dedup();
    Ok(names)
}

/// Data variables declared in an OPeNDAP DDS, coordinates excluded.
pub(crate) fn parse_dds_variables(dds: &str) -> Result<Vec<String>> {
    // `Float32 T2M[time = 24][lat = 361][lon = 576];`
    let decl = Regex::new(r"^\w+\s+(\w+)\[")?;
    let mut depth = 0usize;
    let mut out: Vec<String> = Vec::new();
    for line in dds.lines().map(str::trim) {
        if line.ends_with('{') {
            depth += 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix('}') {
            depth = depth.saturating_sub(1);
            // a closing grid at depth 1 is named after its variable
            if depth == 1 {
                out.push(rest.trim().trim_end_matches(';').trim().to_string());
            }
            continue;
        }
        if depth == 1 {
            if let Some(cap) = decl.captures(line) {
                out.push(cap[1].to_string());
            }
        }
    }
    out.retain(|v| !v.is_empty() && !COORDINATES.contains(&v.as_str()));
    out.dedup();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog() {
        let c = Catalog::builtin().unwrap();
        let slv = c.product("M2T1NXSLV").unwrap();
        assert_eq!(slv.collection, "tavg1_2d_slv_Nx");
        assert!(slv.contains("T2M"));
        assert!(c.product("M2XXXXXXX").is_err());
        let with_tqv: Vec<&str> = c.products_with("TQV").map(|p| p.name.as_str()).collect();
        assert_eq!(with_tqv, ["M2T1NXSLV", "M2I1NXINT"]);
    }

    #[test]
    fn file_names_follow_streams() {
        let c = Catalog::builtin().unwrap();
        let aer = c.product("M2T1NXAER").unwrap();
        let day = NaiveDate::from_ymd_opt(2015, 7, 5).unwrap();
        assert_eq!(aer.file_name(day), "MERRA2_400.tavg1_2d_aer_Nx.20150705.nc4");
        let day = NaiveDate::from_ymd_opt(1995, 1, 1).unwrap();
        assert_eq!(aer.file_name(day), "MERRA2_200.tavg1_2d_aer_Nx.19950101.nc4");
    }

    #[test]
    fn product_directories() {
        let html = r#"<a href="M2I1NXASM.5.12.4/contents.html">M2I1NXASM.5.12.4/</a>
            <a href="../contents.html">Parent Directory</a>
            <a href="M2T1NXSLV.5.12.4/contents.html">M2T1NXSLV.5.12.4/</a>"#;
        assert_eq!(
            parse_product_dirs(html).unwrap(),
            vec![
                ("M2I1NXASM".to_string(), "5.12.4".to_string()),
                ("M2T1NXSLV".to_string(), "5.12.4".to_string())
            ]
        );
    }

    #[test]
    fn month_listing() {
        let html = r#"<a href="MERRA2_400.tavg1_2d_slv_Nx.20121201.nc4.html">MERRA2_400.tavg1_2d_slv_Nx.20121201.nc4</a>
            <a href="MERRA2_400.tavg1_2d_slv_Nx.20121201.nc4.dmr">MERRA2_400.tavg1_2d_slv_Nx.20121201.nc4</a>
            <a href="MERRA2_400.tavg1_2d_slv_Nx.20121202.nc4.html">MERRA2_400.tavg1_2d_slv_Nx.20121202.nc4</a>"#;
        assert_eq!(
            parse_file_names(html).unwrap(),
            vec![
                "MERRA2_400.tavg1_2d_slv_Nx.20121201.nc4",
                "MERRA2_400.tavg1_2d_slv_Nx.20121202.nc4"
            ]
        );
    }

    #[test]
    fn dds_variables() {
        let dds = "Dataset {
    Float64 lon[lon = 576];
    Float64 lat[lat = 361];
    Int32 time[time = 24];
    Grid {
     ARRAY:
        Float32 CLDPRS[time = 24][lat = 361][lon = 576];
     MAPS:
        Int32 time[time = 24];
        Float64 lat[lat = 361];
        Float64 lon[lon = 576];
    } CLDPRS;
    Float32 TQV[time = 24][lat = 361][lon = 576];
} MERRA2_400.tavg1_2d_slv_Nx.20121212.nc4;";
        assert_eq!(parse_dds_variables(dds).unwrap(), vec!["CLDPRS", "TQV"]);
    }

    #[test]
    fn catalog_json_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merra2.json");
        let c = Catalog::builtin().unwrap();
        let written = cache_json(&path, || Ok(c.clone())).unwrap();
        let read: Catalog = cache_json(&path, || panic!("memoized")).unwrap();
        assert_eq!(written, read);
    }
}
