//! Per-version analysis data model.
//!
//! Which maps exist, which binning/template variants were run, and which bulk
//! arrays each product carries all depend on the analysis version.

use crate::error::{MarvinError, MarvinResult};
use crate::versions::DapVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three product kinds sharing one spatial grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Cube,
    Maps,
    ModelCube,
}

impl DataKind {
    pub const ALL: [DataKind; 3] = [DataKind::Cube, DataKind::Maps, DataKind::ModelCube];

    pub fn name(self) -> &'static str {
        match self {
            DataKind::Cube => "Cube",
            DataKind::Maps => "Maps",
            DataKind::ModelCube => "ModelCube",
        }
    }

    /// Whether the product is selected by bintype/template.
    pub fn is_analysis(self) -> bool {
        self != DataKind::Cube
    }

    /// Path template name of the product file.
    pub fn path_template(self) -> &'static str {
        match self {
            DataKind::Cube => "mangacube",
            DataKind::Maps => "mangamap",
            DataKind::ModelCube => "mangadap",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cube" => Ok(DataKind::Cube),
            "maps" => Ok(DataKind::Maps),
            "modelcube" => Ok(DataKind::ModelCube),
            other => Err(format!("unknown data kind '{other}'")),
        }
    }
}

/// Minimum analysis version a product kind is available from.
pub fn min_dapver(kind: DataKind) -> Option<DapVersion> {
    match kind {
        DataKind::Cube => None,
        DataKind::Maps => Some(DapVersion::new(1, 1, 1)),
        DataKind::ModelCube => Some(DapVersion::new(2, 0, 2)),
    }
}

const MPL4: DapVersion = DapVersion::new(1, 1, 1);

/// One analysis map property and its channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapProperty {
    pub name: String,
    /// Empty for single-channel properties.
    pub channels: Vec<String>,
    pub unit: String,
    pub description: String,
}

impl MapProperty {
    fn new(name: &str, channels: &[&str], unit: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            unit: unit.to_string(),
            description: description.to_string(),
        }
    }

    pub fn is_multichannel(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Position of `channel` in the property's planes.
    ///
    /// Single-channel properties take no channel.
    pub fn channel_index(&self, channel: Option<&str>) -> MarvinResult<usize> {
        match (self.is_multichannel(), channel) {
            (false, None) => Ok(0),
            (false, Some(ch)) => Err(MarvinError::NotFound(format!(
                "property {} has no channel {ch}",
                self.name
            ))),
            (true, None) => Err(MarvinError::Identifier(format!(
                "property {} requires a channel, one of {}",
                self.name,
                self.channels.join(", ")
            ))),
            (true, Some(ch)) => self
                .channels
                .iter()
                .position(|c| c == ch)
                .ok_or_else(|| {
                    MarvinError::NotFound(format!("channel {ch} not found for property {}", self.name))
                }),
        }
    }

    /// Number of image planes the property occupies.
    pub fn n_planes(&self) -> usize {
        self.channels.len().max(1)
    }

    /// Key naming one property/channel pair, e.g. `emline_gflux_ha_6564`.
    pub fn full_name(&self, channel: Option<&str>) -> String {
        match channel {
            Some(ch) => format!("{}_{}", self.name, ch),
            None => self.name.clone(),
        }
    }
}

fn emline_channels(dapver: DapVersion) -> Vec<&'static str> {
    let oii = if dapver <= MPL4 { "oiid_3728" } else { "oii_3727" };
    vec![oii, "hb_4862", "oiii_5008", "ha_6564", "nii_6585", "sii_6718"]
}

/// Map properties available at `dapver`.
pub fn map_properties(dapver: DapVersion) -> Vec<MapProperty> {
    let channels = emline_channels(dapver);
    let mut props = vec![
        MapProperty::new(
            "emline_gflux",
            &channels,
            "1e-17 erg/s/cm^2/spaxel",
            "Gaussian profile integrated flux",
        ),
        MapProperty::new("emline_gvel", &channels, "km/s", "Gaussian profile velocity"),
        MapProperty::new("stellar_vel", &[], "km/s", "Stellar velocity"),
        MapProperty::new("stellar_sigma", &[], "km/s", "Stellar velocity dispersion"),
    ];
    if dapver > MPL4 {
        props.push(MapProperty::new(
            "specindex",
            &["d4000", "dn4000"],
            "",
            "Spectral index",
        ));
    }
    props
}

/// Look up a property, failing with "unknown map".
pub fn find_map(dapver: DapVersion, parameter: &str) -> MarvinResult<MapProperty> {
    map_properties(dapver)
        .into_iter()
        .find(|p| p.name == parameter)
        .ok_or_else(|| MarvinError::NotFound(format!("unknown map {parameter} for dapver {dapver}")))
}

/// Validate a property/channel pair and return the property and plane index.
pub fn validate_map(
    dapver: DapVersion,
    parameter: &str,
    channel: Option<&str>,
) -> MarvinResult<(MapProperty, usize)> {
    let prop = find_map(dapver, parameter)?;
    let idx = prop.channel_index(channel)?;
    Ok((prop, idx))
}

/// Maps shown by default, as `parameter[:channel]` keys.
pub fn default_mapset(dapver: DapVersion) -> Vec<String> {
    [
        ("emline_gflux", Some("ha_6564")),
        ("emline_gflux", Some("oiii_5008")),
        ("stellar_vel", None),
    ]
    .into_iter()
    .filter(|(param, channel)| validate_map(dapver, param, *channel).is_ok())
    .map(|(param, channel)| match channel {
        Some(ch) => format!("{param}:{ch}"),
        None => param.to_string(),
    })
    .collect()
}

/// Default `(bintype, template)` for an analysis version.
pub fn default_bintemp(dapver: DapVersion) -> (&'static str, &'static str) {
    if dapver <= MPL4 {
        ("NONE", "MIUSCAT-THIN")
    } else {
        ("SPX", "GAU-MILESHC")
    }
}

/// Every `(bintype, template)` variant run at `dapver`.
pub fn bintemps(dapver: DapVersion) -> Vec<(String, String)> {
    let (bintypes, templates): (&[&str], &[&str]) = if dapver <= MPL4 {
        (&["NONE", "STON", "RADIAL", "ALL"], &["MIUSCAT-THIN", "M11-STELIB-ZSOL"])
    } else {
        (&["SPX", "VOR10", "NRE", "ALL"], &["GAU-MILESHC"])
    };
    bintypes
        .iter()
        .flat_map(|b| templates.iter().map(move |t| (b.to_string(), t.to_string())))
        .collect()
}

/// Resolved analysis-variant selectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selectors {
    pub bintype: String,
    pub template: String,
}

impl Selectors {
    /// Resolve requested selectors against the version's variants.
    ///
    /// Missing values take the version default; the result must be a
    /// variant that was actually run.
    pub fn resolve(
        dapver: DapVersion,
        bintype: Option<&str>,
        template: Option<&str>,
    ) -> MarvinResult<Self> {
        let (def_bin, def_tmp) = default_bintemp(dapver);
        let bintype = bintype.map(str::to_uppercase).unwrap_or_else(|| def_bin.to_string());
        let template = template.map(str::to_uppercase).unwrap_or_else(|| def_tmp.to_string());

        let known = bintemps(dapver);
        if !known.iter().any(|(b, _)| *b == bintype) {
            return Err(MarvinError::Identifier(format!(
                "invalid bintype {bintype} for dapver {dapver}"
            )));
        }
        if !known.iter().any(|(b, t)| *b == bintype && *t == template) {
            return Err(MarvinError::Identifier(format!(
                "invalid template {template} for bintype {bintype} at dapver {dapver}"
            )));
        }
        Ok(Self { bintype, template })
    }

    /// `BINTYPE-TEMPLATE` label.
    pub fn bintemp(&self) -> String {
        format!("{}-{}", self.bintype, self.template)
    }
}

impl fmt::Display for Selectors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.bintype, self.template)
    }
}

/// Bulk array names of a product kind.
pub fn bulk_arrays(kind: DataKind, dapver: DapVersion) -> Vec<String> {
    match kind {
        DataKind::Cube => ["flux", "ivar", "mask", "wavelength"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        DataKind::ModelCube => [
            "flux",
            "ivar",
            "mask",
            "model",
            "emline",
            "emline_base",
            "wavelength",
            "redcorr",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        DataKind::Maps => map_properties(dapver)
            .iter()
            .flat_map(|p| {
                [
                    p.name.clone(),
                    format!("{}_ivar", p.name),
                    format!("{}_mask", p.name),
                ]
            })
            .collect(),
    }
}

/// Arrays computed from others rather than stored.
pub fn derived_arrays(kind: DataKind) -> &'static [&'static str] {
    match kind {
        DataKind::ModelCube => &["stellar_continuum"],
        _ => &[],
    }
}

/// Whether `name` is a stored or derived array of `kind`.
pub fn has_array(kind: DataKind, dapver: DapVersion, name: &str) -> bool {
    derived_arrays(kind).contains(&name) || bulk_arrays(kind, dapver).iter().any(|a| a == name)
}

/// Whether a stored array is one value per spaxel per wavelength.
pub fn is_spectral(kind: DataKind, name: &str) -> bool {
    match kind {
        DataKind::Cube | DataKind::ModelCube => !matches!(name, "wavelength" | "redcorr"),
        DataKind::Maps => false,
    }
}

/// FITS extension name holding an array.
pub fn hdu_name(name: &str) -> String {
    match name {
        "wavelength" => "WAVE".to_string(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const V202: DapVersion = DapVersion::new(2, 0, 2);

    #[test]
    fn test_default_bintemp_by_version() {
        assert_eq!(default_bintemp(MPL4), ("NONE", "MIUSCAT-THIN"));
        assert_eq!(default_bintemp(V202), ("SPX", "GAU-MILESHC"));
        assert_eq!(default_bintemp(DapVersion::new(2, 2, 1)), ("SPX", "GAU-MILESHC"));
    }

    #[test]
    fn test_bintemps_at_202() {
        let variants = bintemps(V202);
        let names: Vec<String> = variants.iter().map(|(b, _)| b.clone()).collect();
        assert_eq!(names, vec!["SPX", "VOR10", "NRE", "ALL"]);
        assert!(variants.iter().all(|(_, t)| t == "GAU-MILESHC"));
    }

    #[test]
    fn test_selectors_resolve() {
        let sel = Selectors::resolve(V202, None, None).unwrap();
        assert_eq!(sel.bintemp(), "SPX-GAU-MILESHC");

        let sel = Selectors::resolve(V202, Some("vor10"), None).unwrap();
        assert_eq!(sel.bintype, "VOR10");

        let err = Selectors::resolve(V202, Some("STON"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Identifier);
        assert!(Selectors::resolve(V202, None, Some("MIUSCAT-THIN")).is_err());
    }

    #[test]
    fn test_find_map_and_channels() {
        let (prop, idx) = validate_map(V202, "emline_gflux", Some("ha_6564")).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(prop.full_name(Some("ha_6564")), "emline_gflux_ha_6564");

        let (prop, idx) = validate_map(V202, "stellar_vel", None).unwrap();
        assert_eq!(idx, 0);
        assert!(!prop.is_multichannel());

        let err = find_map(V202, "unknown_param").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("unknown map"));

        assert!(validate_map(V202, "emline_gflux", Some("xx_0000")).is_err());
        assert!(validate_map(V202, "emline_gflux", None).is_err());
        assert!(validate_map(V202, "stellar_vel", Some("ha_6564")).is_err());
    }

    #[test]
    fn test_mpl4_oii_channel_name() {
        assert!(validate_map(MPL4, "emline_gflux", Some("oiid_3728")).is_ok());
        assert!(validate_map(MPL4, "emline_gflux", Some("oii_3727")).is_err());
        assert!(find_map(MPL4, "specindex").is_err());
    }

    #[test]
    fn test_bulk_arrays() {
        let cube = bulk_arrays(DataKind::Cube, V202);
        assert!(cube.contains(&"flux".to_string()));
        assert!(has_array(DataKind::ModelCube, V202, "stellar_continuum"));
        assert!(!has_array(DataKind::Cube, V202, "stellar_continuum"));
        assert!(has_array(DataKind::Maps, V202, "emline_gflux_ivar"));
        assert_eq!(hdu_name("wavelength"), "WAVE");
        assert_eq!(hdu_name("emline_base"), "EMLINE_BASE");
    }

    #[test]
    fn test_min_dapver() {
        assert_eq!(min_dapver(DataKind::Cube), None);
        assert_eq!(min_dapver(DataKind::ModelCube), Some(V202));
    }
}
