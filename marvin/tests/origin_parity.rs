//! The same target served from file, database and remote API must look identical

mod common;

use approx::assert_relative_eq;
use common::{db_context, init_logging, remote_context, FileFixture};
use marvin::synthetic::SyntheticGalaxy;
use marvin::{DataKind, DataObject, MarvinContext, ObjectRequest, Origin, SpaxelOptions, SpaxelQuery};
use tempfile::TempDir;

struct Origins {
    fixture: FileFixture,
    empty: TempDir,
}

impl Origins {
    fn new() -> Self {
        Self {
            fixture: FileFixture::new(),
            empty: TempDir::new().unwrap(),
        }
    }

    fn contexts(&self) -> Vec<(Origin, MarvinContext)> {
        let (remote, _) = remote_context(self.fixture.context(), self.empty.path());
        vec![
            (Origin::File, self.fixture.context()),
            (Origin::Database, db_context(self.empty.path())),
            (Origin::Remote, remote),
        ]
    }
}

fn request() -> ObjectRequest {
    ObjectRequest::plateifu("8485-1901")
}

#[test]
fn test_metadata_parity() {
    init_logging();
    let origins = Origins::new();
    let galaxy = SyntheticGalaxy::new();

    for kind in DataKind::ALL {
        let objects: Vec<DataObject> = origins
            .contexts()
            .into_iter()
            .map(|(expected, ctx)| {
                let object = DataObject::construct(kind, &request(), &ctx).unwrap();
                assert_eq!(object.origin(), expected, "{kind} origin");
                object
            })
            .collect();

        let reference = &objects[0];
        assert_eq!(reference.target(), &galaxy.target());
        assert_eq!(reference.shape(), galaxy.shape);
        for other in &objects[1..] {
            assert_eq!(other.target(), reference.target());
            assert_eq!(other.versions(), reference.versions());
            assert_eq!(other.selectors(), reference.selectors());
            assert_eq!(other.shape(), reference.shape());
            assert_eq!(other.header(), reference.header(), "{kind} header from {}", other.origin());
            assert_eq!(other.wcs().reference(), reference.wcs().reference());
        }
    }
}

#[test]
fn test_spaxel_parity() {
    init_logging();
    let origins = Origins::new();
    let query = SpaxelQuery::pixel(5, 9);

    let mut spectra = Vec::new();
    let mut properties = Vec::new();
    let mut models = Vec::new();
    for (_, ctx) in origins.contexts() {
        let cube = DataObject::cube(&request(), &ctx).unwrap();
        let spaxel = cube.get_spaxel(&query, SpaxelOptions::default()).unwrap();
        spectra.push(spaxel.spectrum.clone().unwrap());
        properties.push(spaxel.properties.clone().unwrap());

        let modelcube = DataObject::modelcube(&request(), &ctx).unwrap();
        let options = SpaxelOptions {
            spectrum: false,
            properties: false,
            model: true,
        };
        let spaxel = modelcube.get_spaxel(&query, options).unwrap();
        assert!(spaxel.spectrum.is_none());
        assert!(spaxel.properties.is_none());
        models.push(spaxel.model.clone().unwrap());
    }

    for k in 0..spectra[0].flux.len() {
        assert_relative_eq!(spectra[0].flux[k], SyntheticGalaxy::flux_value(k, 9, 5));
    }
    let ha = &properties[0]["emline_gflux_ha_6564"];
    assert_relative_eq!(ha.value, SyntheticGalaxy::map_value(3, 9, 5));
    assert_relative_eq!(models[0].stellar_continuum[1], models[0].model[1] - 0.125 - 0.0625);

    for i in 1..spectra.len() {
        assert_eq!(spectra[i], spectra[0]);
        assert_eq!(properties[i], properties[0]);
        assert_eq!(models[i], models[0]);
    }
}

#[test]
fn test_map_parity() {
    init_logging();
    let origins = Origins::new();

    let maps: Vec<_> = origins
        .contexts()
        .into_iter()
        .map(|(_, ctx)| {
            let maps = DataObject::maps(&request(), &ctx).unwrap();
            maps.get_map("emline_gflux", Some("oiii_5008")).unwrap()
        })
        .collect();

    assert_eq!(maps[0].shape(), (34, 34));
    assert_relative_eq!(maps[0].value()[[7, 2]], SyntheticGalaxy::map_value(2, 7, 2));
    assert_eq!(maps[0].bintype, "SPX");
    assert_eq!(maps[0].template, "GAU-MILESHC");
    for map in &maps[1..] {
        assert_eq!(map.as_ref(), maps[0].as_ref());
    }
}

#[test]
fn test_related_objects_share_context() {
    init_logging();
    let origins = Origins::new();

    for (expected, ctx) in origins.contexts() {
        let modelcube = DataObject::modelcube(&request(), &ctx).unwrap();
        let cube = modelcube.get_related(DataKind::Cube).unwrap();
        assert_eq!(cube.kind(), DataKind::Cube);
        assert_eq!(cube.origin(), expected);
        assert_eq!(cube.versions(), modelcube.versions());
        assert_eq!(cube.mode(), modelcube.mode());

        let maps = modelcube.get_related(DataKind::Maps).unwrap();
        assert_eq!(maps.selectors(), modelcube.selectors());

        // Memoized: a second call returns the same object.
        let again = modelcube.get_related(DataKind::Cube).unwrap();
        assert!(std::ptr::eq(cube, again));
        assert!(std::ptr::eq(modelcube.get_related(DataKind::ModelCube).unwrap(), &modelcube));
    }
}
