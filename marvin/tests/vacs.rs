//! Value-added catalogs attached to data objects

mod common;

use approx::assert_relative_eq;
use common::{dr15, init_logging, CountingDownloader, CountingResolver, FileFixture};
use marvin::synthetic::SyntheticGalaxy;
use marvin::vacs::{firefly, VacRegistry, VAC_SET_FAILURE};
use marvin::{DataKind, DataObject, ErrorKind, ObjectRequest};
use std::sync::Arc;

fn request() -> ObjectRequest {
    ObjectRequest::plateifu("8485-1901")
}

/// FIREFLY is built from the DR15 analysis, so its objects are DR15 ones.
fn fixture() -> FileFixture {
    FileFixture::with_galaxy(SyntheticGalaxy::new().with_versions(dr15()))
}

#[test]
fn test_vac_downloaded_once_then_cached() {
    init_logging();
    let fixture = fixture();
    let resolver = Arc::new(CountingResolver::new(fixture.layout()));
    let downloader = Arc::new(CountingDownloader::new(fixture.layout()));
    let ctx = fixture
        .context()
        .with_paths(resolver.clone())
        .with_downloader(downloader.clone());

    let maps = DataObject::maps(&request(), &ctx).unwrap();
    assert_eq!(maps.vacs().names(), vec!["mangaffly"]);
    assert!(!maps.vacs().is_loaded("mangaffly"));
    let resolved_at_construction = resolver.count();

    let first = maps.vacs().get("mangaffly").unwrap();
    assert_eq!(downloader.count(), 1);
    assert_eq!(resolver.count(), resolved_at_construction + 1);
    assert!(maps.vacs().is_loaded("mangaffly"));

    let table = first.as_table().unwrap();
    assert_eq!(table.target_row, Some(0));
    let row = table.target_values().unwrap();
    assert_relative_eq!(row["PLATE"], 8485.0);
    assert!(row.contains_key("LW_AGE_1RE"));

    let second = maps.vacs().get("mangaffly").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(downloader.count(), 1);
    assert_eq!(resolver.count(), resolved_at_construction + 1);

    let all = maps.vacs().load_all().unwrap();
    assert!(Arc::ptr_eq(&all["mangaffly"], &first));
    assert_eq!(downloader.count(), 1);
}

#[test]
fn test_vac_found_locally() {
    init_logging();
    let fixture = fixture();
    fixture.galaxy.write_firefly(&fixture.layout()).unwrap();

    let cube = DataObject::cube(&request(), &fixture.context()).unwrap();
    let data = cube.vacs().get("mangaffly").unwrap();
    assert!(data.as_image().is_none());
    assert_eq!(data.as_table().unwrap().target_row, Some(0));
}

#[test]
fn test_vac_unavailable() {
    init_logging();
    let fixture = fixture();
    let cube = DataObject::cube(&request(), &fixture.context()).unwrap();

    let err = cube.vacs().get("mangaffly").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!cube.vacs().is_loaded("mangaffly"));

    let err = cube.vacs().get("no_such_vac").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = cube.vacs().load_all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    assert!(err.to_string().starts_with(VAC_SET_FAILURE));
    assert!(err.to_string().contains("mangaffly"));
}

#[test]
fn test_vac_not_attached_before_dr15() {
    init_logging();
    let fixture = FileFixture::new();
    fixture.galaxy.write_firefly(&fixture.layout()).unwrap();

    let cube = DataObject::cube(&request(), &fixture.context()).unwrap();
    assert_eq!(cube.versions().dapver.to_string(), "2.0.2");
    assert!(cube.vacs().names().is_empty());
    let err = cube.vacs().get("mangaffly").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(cube.vacs().load_all().unwrap().is_empty());
}

#[test]
fn test_vac_restricted_to_kind() {
    init_logging();
    let fixture = fixture();
    fixture.galaxy.write_firefly(&fixture.layout()).unwrap();
    let mut only_maps = firefly();
    only_maps.targets = vec![DataKind::Maps];
    let mut registry = VacRegistry::new();
    registry.register(only_maps);
    let ctx = fixture.context().with_vacs(registry);

    let cube = DataObject::cube(&request(), &ctx).unwrap();
    assert!(cube.vacs().names().is_empty());
    let err = cube.vacs().get("mangaffly").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let maps = cube.get_related(DataKind::Maps).unwrap();
    assert!(maps.vacs().get("mangaffly").is_ok());
}
