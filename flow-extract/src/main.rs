//! Run block optical flow over a raw RGBA stream and report motion events.

use clap::*;
use flowgrid::prelude::v1::{Result, *};
use flowgrid::utils::open_file;
use log::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Totals over a processed stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Summary {
    frames: usize,
    estimated: usize,
    events: usize,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("flowgrid").join("config.json"))
        .filter(|p| p.exists())
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    let path = match path {
        Some(path) => Some(PathBuf::from(path)),
        None => default_config_path(),
    };

    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            let file = File::open(&path)?;
            let config = serde_json::from_reader(file)
                .map_err(|e| anyhow!("Invalid config {}: {e}", path.display()))?;
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Apply `Name=value` overrides.
fn apply_overrides<'a>(
    config: &mut PipelineConfig,
    sets: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for set in sets {
        let (name, value) = set
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected Name=value, got {set}"))?;
        config.set_prop_str(name.trim(), value.trim())?;
    }
    config.validate()
}

/// One line per tunable property, with its current value and bounds.
fn describe_props(config: &mut PipelineConfig) -> Vec<String> {
    config
        .props()
        .into_iter()
        .map(|(name, prop)| match prop {
            Property::Float(p) => format!("{name} = {} [{}; {}]", p.val, p.min, p.max),
            Property::Usize(p) => format!("{name} = {} [{}; {}]", p.val, p.min, p.max),
        })
        .collect()
}

/// Run every frame of `source` through the pipeline.
///
/// Broken input is an error. Each frame's flow field is written to `out`, if given.
fn run(
    pipeline: &mut Pipeline,
    source: &mut impl FrameSource,
    mut out: Option<&mut dyn Write>,
) -> Result<Summary> {
    let (width, height) = source
        .get_dims()
        .ok_or_else(|| anyhow!("Unknown frame dimensions"))?;
    let fps = source
        .get_framerate()
        .ok_or_else(|| anyhow!("Unknown framerate"))?;

    let mut frame = vec![];
    let mut summary = Summary::default();

    while source.next_frame(&mut frame)? {
        let now = Duration::from_secs_f64(summary.frames as f64 / fps);
        let report = pipeline.process_frame(&frame, width, height, now)?;

        if report.delta == FrameDelta::Changed {
            summary.estimated += 1;
        }

        if report.event.is_some() {
            summary.events += 1;
        }

        if let Some(out) = &mut out {
            pipeline.field().write_to(out)?;
        }

        summary.frames += 1;
    }

    Ok(summary)
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("flow-extract")
        .version(crate_version!())
        .arg(
            Arg::new("width")
                .long("width")
                .short('w')
                .takes_value(true)
                .required_unless_present("list"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .short('h')
                .takes_value(true)
                .required_unless_present("list"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .required_unless_present("list"),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .takes_value(true)
                .default_value("30"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true),
        )
        .arg(
            Arg::new("set")
                .long("set")
                .short('s')
                .takes_value(true)
                .multiple_occurrences(true),
        )
        .arg(Arg::new("list").long("list").short('l'))
        .arg(Arg::new("output").takes_value(true).required(false))
        .get_matches();

    let mut config = load_config(matches.value_of("config"))?;
    apply_overrides(&mut config, matches.values_of("set").into_iter().flatten())?;

    if matches.is_present("list") {
        for line in describe_props(&mut config) {
            println!("{line}");
        }
        return Ok(());
    }

    let input = matches
        .value_of("input")
        .ok_or_else(|| anyhow!("No input supplied"))?;
    let width: usize = matches.value_of("width").unwrap_or_default().parse()?;
    let height: usize = matches.value_of("height").unwrap_or_default().parse()?;
    let fps: f64 = matches.value_of("fps").unwrap_or("30").parse()?;

    if !(fps.is_finite() && fps > 0.0) {
        return Err(anyhow!("Framerate must be positive"));
    }

    debug!("{:?}", config);

    let mut pipeline = Pipeline::new(config, GridRect::sized(width as f32, height as f32))?;

    pipeline.add_listener(|e: &MotionEvent| {
        println!(
            "{:.3}s: motion {:.3} over {:.3}",
            e.at.as_secs_f64(),
            e.movement,
            e.threshold
        )
    });

    // Output file always ends with `.mvec`.
    let mut out = match matches.value_of("output") {
        Some(output) => Some(BufWriter::new(File::create(format!("{output}.mvec"))?)),
        None => None,
    };

    let mut source = RawFrameReader::new(open_file(input)?, width, height).with_framerate(fps);

    let summary = run(
        &mut pipeline,
        &mut source,
        out.as_mut().map(|o| o as &mut dyn Write),
    )?;

    if let Some(out) = &mut out {
        out.flush()?;
    }

    println!(
        "Processed {} frames ({} with motion estimates), {} events",
        summary.frames, summary.estimated, summary.events
    );

    Ok(())
}
