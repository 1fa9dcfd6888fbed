//! Presentation payloads for web front ends.

use crate::datamodel::{self, DataKind, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::maps::{Map, MapDict};
use crate::object::DataObject;
use crate::spaxel::Spaxel;
use serde::Serialize;

/// `1/sqrt(ivar)`, or 0 where the inverse variance is not positive.
pub fn ivar_to_error(ivar: &[f64]) -> Vec<f64> {
    ivar.iter()
        .map(|&v| if v > 0.0 { 1.0 / v.sqrt() } else { 0.0 })
        .collect()
}

/// One plotted wavelength: `[wave, [flux, err]]` or `[wave, [flux, err], [model, 0]]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SpectrumRow {
    Flux(f64, [f64; 2]),
    WithModel(f64, [f64; 2], [f64; 2]),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSpectrum {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub data: Vec<SpectrumRow>,
}

/// Spectrum rows of a spaxel, with the model when the spaxel carries one.
pub fn web_spectrum(spaxel: &Spaxel<'_>) -> MarvinResult<WebSpectrum> {
    let spectrum = spaxel.spectrum.as_ref().ok_or_else(|| {
        MarvinError::NotFound(format!("spaxel ({}, {}) carries no spectrum", spaxel.x, spaxel.y))
    })?;
    let errors = ivar_to_error(&spectrum.ivar);
    let model = spaxel.model.as_ref().map(|m| &m.model);

    let data = spectrum
        .wavelength
        .iter()
        .zip(&spectrum.flux)
        .zip(&errors)
        .enumerate()
        .map(|(i, ((&wave, &flux), &err))| match model.and_then(|m| m.get(i)) {
            Some(&fit) => SpectrumRow::WithModel(wave, [flux, err], [fit, 0.0]),
            None => SpectrumRow::Flux(wave, [flux, err]),
        })
        .collect();

    Ok(WebSpectrum {
        title: format!(
            "Spaxel at x={}, y={} (RA={:.5}, Dec={:.5})",
            spaxel.x, spaxel.y, spaxel.ra, spaxel.dec
        ),
        xlabel: "Wavelength [Ångström]".to_string(),
        ylabel: "Flux [1e-17 erg/s/cm^2/Ang/spaxel]".to_string(),
        data,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebMap {
    pub title: String,
    pub msg: String,
    pub unit: String,
    pub values: Vec<Vec<f64>>,
    pub ivar: Vec<Vec<f64>>,
    pub mask: Vec<Vec<i32>>,
}

fn rows<T: Copy>(array: &ndarray::Array2<T>) -> Vec<Vec<T>> {
    array.rows().into_iter().map(|r| r.to_vec()).collect()
}

pub fn web_map(map: &Map) -> WebMap {
    let name = map.name();
    WebMap {
        msg: format!("{name}: {}-{}", map.bintype, map.template),
        title: name,
        unit: map.unit.clone(),
        values: rows(map.value()),
        ivar: rows(map.ivar()),
        mask: rows(map.mask()),
    }
}

/// Split `BINTYPE-TEMPLATE` at the first dash.
pub fn split_bintemp(bintemp: &str) -> MarvinResult<(String, String)> {
    match bintemp.split_once('-') {
        Some((bintype, template)) if !bintype.is_empty() && !template.is_empty() => {
            Ok((bintype.to_string(), template.to_string()))
        }
        _ => Err(MarvinError::Identifier(format!(
            "'{bintemp}' is not a BINTYPE-TEMPLATE selector"
        ))),
    }
}

/// Web payloads for `params` (or the default map set) of an object's Maps.
///
/// `bintemp` selects another analysis variant of the same target. Any map
/// that cannot be built fails the whole request with the enumerated keys.
pub fn build_map_dict(
    object: &DataObject,
    params: &[String],
    bintemp: Option<&str>,
) -> MarvinResult<Vec<WebMap>> {
    let params = if params.is_empty() {
        datamodel::default_mapset(object.versions().dapver)
    } else {
        params.to_vec()
    };

    let dict = match bintemp {
        Some(bintemp) => {
            let (bintype, template) = split_bintemp(bintemp)?;
            let selectors =
                Selectors::resolve(object.versions().dapver, Some(&bintype), Some(&template))?;
            let maps = object.related_with(DataKind::Maps, &selectors)?;
            MapDict::collect(&maps, &params)
        }
        None => MapDict::collect(object.get_related(DataKind::Maps)?, &params),
    };

    let keys = dict.keys().to_vec();
    let maps = dict.into_complete()?;
    Ok(keys
        .iter()
        .filter_map(|k| maps.get(k))
        .map(|m| web_map(m.as_ref()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::maps::MapData;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_ivar_to_error() {
        let err = ivar_to_error(&[4.0, 0.0, -1.0, 0.25]);
        assert_relative_eq!(err[0], 0.5);
        assert_eq!(err[1], 0.0);
        assert_eq!(err[2], 0.0);
        assert_relative_eq!(err[3], 2.0);
    }

    #[test]
    fn test_split_bintemp() {
        assert_eq!(
            split_bintemp("SPX-GAU-MILESHC").unwrap(),
            ("SPX".to_string(), "GAU-MILESHC".to_string())
        );
        assert_eq!(split_bintemp("SPX").unwrap_err().kind(), ErrorKind::Identifier);
        assert_eq!(split_bintemp("-GAU").unwrap_err().kind(), ErrorKind::Identifier);
    }

    #[test]
    fn test_web_map_payload() {
        let map = Map {
            parameter: "emline_gflux".to_string(),
            channel: Some("ha_6564".to_string()),
            unit: "1e-17 erg/s/cm^2/spaxel".to_string(),
            bintype: "SPX".to_string(),
            template: "GAU-MILESHC".to_string(),
            data: MapData {
                value: array![[1.0, 2.0], [3.0, 4.0]],
                ivar: array![[1.0, 1.0], [1.0, 0.0]],
                mask: array![[0, 0], [0, 1]],
            },
        };
        let web = web_map(&map);
        assert_eq!(web.title, "emline_gflux_ha_6564");
        assert_eq!(web.msg, "emline_gflux_ha_6564: SPX-GAU-MILESHC");
        assert_eq!(web.values, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(web.mask[1][1], 1);

        let json = serde_json::to_value(&web).unwrap();
        assert_eq!(json["values"][1][0], 3.0);
    }

    #[test]
    fn test_spectrum_row_encoding() {
        let row = SpectrumRow::WithModel(3600.0, [1.0, 0.5], [0.75, 0.0]);
        assert_eq!(serde_json::to_string(&row).unwrap(), "[3600.0,[1.0,0.5],[0.75,0.0]]");
        let row = SpectrumRow::Flux(3600.0, [1.0, 0.5]);
        assert_eq!(serde_json::to_string(&row).unwrap(), "[3600.0,[1.0,0.5]]");
    }
}
