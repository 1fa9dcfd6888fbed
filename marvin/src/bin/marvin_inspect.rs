//! Construct a Cube, Maps or ModelCube and summarise it

use anyhow::{bail, Context, Result};
use clap::Parser;
use marvin::paths::TemplatePathResolver;
use marvin::synthetic::SyntheticGalaxy;
use marvin::vacs::VacData;
use marvin::{
    DataKind, DataMode, DataObject, InMemoryDatabase, MarvinConfig, MarvinContext, ObjectRequest,
    SpaxelOptions, SpaxelQuery,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect a MaNGA data product from any origin")]
struct Args {
    /// Product kind: cube, maps or modelcube
    #[arg(long, default_value = "cube")]
    kind: DataKind,

    /// Target plate-IFU, e.g. 8485-1901
    #[arg(long, conflicts_with_all = ["mangaid", "file"])]
    plateifu: Option<String>,

    /// Target mangaid, e.g. 1-209232
    #[arg(long, conflicts_with = "file")]
    mangaid: Option<String>,

    /// Explicit product file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Release to use instead of the configured default
    #[arg(long)]
    release: Option<String>,

    /// Data access mode: auto, local or remote
    #[arg(long)]
    mode: Option<DataMode>,

    /// Analysis binning type
    #[arg(long)]
    bintype: Option<String>,

    /// Analysis stellar template
    #[arg(long)]
    template: Option<String>,

    /// Configuration file (defaults to $MARVIN_CONFIG or ~/.marvin/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database snapshot (JSON) to use as the database origin
    #[arg(long)]
    db: Option<PathBuf>,

    /// Extract the spaxel at X,Y (array indices from the lower-left corner)
    #[arg(long, value_parser = parse_spaxel)]
    spaxel: Option<(i64, i64)>,

    /// Print statistics of one map, as parameter[:channel]
    #[arg(long)]
    map: Option<String>,

    /// Write a synthetic galaxy into DIR and serve from it
    #[arg(long, value_name = "DIR")]
    demo: Option<PathBuf>,

    /// Load every VAC available to the object
    #[arg(long, default_value_t = false)]
    vacs: bool,
}

fn parse_spaxel(s: &str) -> Result<(i64, i64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|e| format!("invalid x '{x}': {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("invalid y '{y}': {e}"))?;
    Ok((x, y))
}

fn load_config(args: &Args) -> Result<MarvinConfig> {
    let mut config = match &args.config {
        Some(path) => MarvinConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MarvinConfig::from_env_or_default()?,
    };
    if let Some(release) = &args.release {
        config.release = release.to_uppercase();
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(dir) = &args.demo {
        config.sas_base_dir = dir.clone();
    }
    Ok(config)
}

fn build_request(args: &Args) -> Result<ObjectRequest> {
    let mut request = match (&args.plateifu, &args.mangaid, &args.file) {
        (Some(p), None, None) => ObjectRequest::plateifu(p.clone()),
        (None, Some(m), None) => ObjectRequest::mangaid(m.clone()),
        (None, None, Some(f)) => ObjectRequest::file(f),
        (None, None, None) if args.demo.is_some() => {
            ObjectRequest::plateifu(SyntheticGalaxy::new().plateifu.to_string())
        }
        _ => bail!("exactly one of --plateifu, --mangaid or --file is required"),
    };
    if let Some(bintype) = &args.bintype {
        request = request.with_bintype(bintype.clone());
    }
    if let Some(template) = &args.template {
        request = request.with_template(template.clone());
    }
    Ok(request)
}

fn print_summary(object: &DataObject) {
    println!("{object}");
    println!("  mangaid:   {}", object.mangaid());
    println!("  versions:  {}", object.versions());
    if let Some(selectors) = object.selectors() {
        println!("  bintemp:   {selectors}");
    }
    println!("  shape:     {} x {}", object.shape().rows, object.shape().cols);
    if let Some(path) = object.filename() {
        println!("  file:      {}", path.display());
    }
    let (ra, dec) = object.wcs().reference();
    println!("  reference: RA={ra:.6} Dec={dec:.6}");
    println!("  header:    {} keys", object.header().len());
    for key in ["OBJRA", "OBJDEC", "EBVGAL", "DRP3QUAL"] {
        if let Some(value) = object.header().get(key) {
            println!("    {key:<9}= {value}");
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    if let Some(dir) = &args.demo {
        let galaxy = SyntheticGalaxy::new().with_versions(config.default_versions()?);
        let layout = TemplatePathResolver::new(dir);
        let written = galaxy.write_products(&layout)?;
        galaxy.write_firefly(&layout)?;
        log::info!("Wrote {} synthetic products under {}", written.len(), dir.display());
    }

    let mut context = MarvinContext::from_config(config)?;
    if let Some(path) = &args.db {
        let db = InMemoryDatabase::load(path)
            .with_context(|| format!("loading database snapshot {}", path.display()))?;
        log::info!("Loaded {} database records from {}", db.len(), path.display());
        context = context.with_database(Arc::new(db));
    }

    let request = build_request(&args)?;
    let object = DataObject::construct(args.kind, &request, &context)?;
    print_summary(&object);

    if let Some((x, y)) = args.spaxel {
        let spaxel = object.get_spaxel(&SpaxelQuery::pixel(x, y), SpaxelOptions::for_kind(args.kind))?;
        println!("Spaxel ({}, {}) at RA={:.6} Dec={:.6}", spaxel.x, spaxel.y, spaxel.ra, spaxel.dec);
        if let Some(spectrum) = &spaxel.spectrum {
            let mean = spectrum.flux.iter().sum::<f64>() / spectrum.flux.len().max(1) as f64;
            println!("  spectrum:   {} wavelengths, mean flux {mean:.4}", spectrum.flux.len());
        }
        if let Some(model) = &spaxel.model {
            println!("  model:      {} wavelengths", model.model.len());
        }
        if let Some(properties) = &spaxel.properties {
            for (name, prop) in properties {
                println!("  {name:<28} {:>12.4} {}", prop.value, prop.unit);
            }
        }
    }

    if let Some(key) = &args.map {
        let key: marvin::maps::MapKey = key.parse()?;
        let map = object.get_map(&key.parameter, key.channel.as_deref())?;
        let values = map.value();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let masked = map.mask().iter().filter(|m| **m != 0).count();
        println!(
            "Map {} [{}] {}-{}: min {min:.4} max {max:.4}, {masked} masked",
            map.name(),
            map.unit,
            map.bintype,
            map.template
        );
    }

    if args.vacs {
        for (name, data) in object.vacs().load_all()? {
            match data.as_ref() {
                VacData::Table(table) => match table.target_values() {
                    Some(row) => println!("VAC {name}: {row:?}"),
                    None => println!("VAC {name}: no row for {}", object.plateifu()),
                },
                VacData::Image(image) => println!("VAC {name}: image {:?}", image.shape()),
            }
        }
    }

    Ok(())
}
