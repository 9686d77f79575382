//! Record, inspect, replay and drive toio traces from the command line.
//!
//! Telemetry and motor control go to a simulated cube, so every command
//! runs without hardware.

use clap::Parser;
use cubetrace::{
    args::{CommandTask, ReplayCommand, TraceArgs},
    config::CubeConfig,
    coordinates::Transform,
    error::CubeTraceError,
    motor_control::MotorCommander,
    recorder::{PositionTracker, StrokeRecorder},
    render::{draw_up_to, Paint, StrokeSink},
    replay::{define_targets, ReplayPlayer},
    session::SessionRegistry,
    sim_cube::SimCube,
    storage::DirStore,
    stroke_cache::StrokeCache,
    telemetry::{start_reading, stop_reading, TelemetryDispatcher},
};

use log::{error, info, warn};
use std::{process, sync::Arc, thread::sleep, time::Duration};

// Example:
// cargo run --bin cubetrace -- --store traces record --seconds 3 --name circle
// cargo run --bin cubetrace -- --store traces replay circle --upto 20

fn main() {
    env_logger::init();
    let args = TraceArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("cubetrace: {}", e);
        process::exit(1);
    }
}

fn run(args: TraceArgs) -> Result<(), CubeTraceError> {
    let config = match &args.config {
        Some(path) => CubeConfig::from_path(path)?,
        None => CubeConfig::default(),
    };
    let store = DirStore::open(&args.store)?;
    let cache = Arc::new(StrokeCache::new(store, config.cache));

    match args.command {
        CommandTask::Record(cmd) => {
            let mut auto_flush = cache.start_auto_flush();
            let cube = Arc::new(SimCube::builder().build());
            let mut registry = SessionRegistry::new();
            let device = registry.connect(cube)?.device().clone();

            let dispatcher = Arc::new(TelemetryDispatcher::new());
            let recorder = Arc::new(StrokeRecorder::new(Arc::clone(&cache)));
            let tracker = Arc::new(PositionTracker::new());
            dispatcher.register(recorder.clone());
            dispatcher.register(tracker.clone());

            recorder.start();
            start_reading(&registry, &dispatcher)?;
            sleep(Duration::from_secs_f64(cmd.seconds.max(0.0)));
            for e in stop_reading(&registry) {
                warn!("{}", e);
            }
            recorder.stop();
            cache.mark_end_of_line(&device.device_name)?;
            auto_flush.stop();

            if let Some(sample) = tracker.latest(&device.device_id) {
                info!(
                    "{} last seen at ({}, {})",
                    device.device_name, sample.center_x, sample.center_y
                );
            }
            let name = match cmd.name {
                Some(name) => {
                    cache.rename_trace(&device.device_name, &name)?;
                    name
                }
                None => device.device_name.clone(),
            };
            println!("{}: {} samples", name, cache.get_trace(&name)?.len());
            for e in registry.disconnect_all() {
                warn!("{}", e);
            }
        }

        CommandTask::List => {
            for name in cache.trace_names()? {
                println!("{}\t{}", name, cache.get_trace(&name)?.len());
            }
        }

        CommandTask::Replay(cmd) => replay(&cache, &config, cmd)?,

        CommandTask::Drive(cmd) => {
            let samples = cache.get_trace(&cmd.name)?;
            if samples.is_empty() {
                return Err(CubeTraceError::NoSuchTrace(cmd.name));
            }
            let targets = define_targets(&samples, config.motor.coordinate_type);

            let cube = Arc::new(SimCube::builder().paused().build());
            let mut registry = SessionRegistry::new();
            let link = Arc::clone(registry.connect(cube.clone())?.link());
            let mut commander = MotorCommander::new(link, config.motor);
            let report = commander.send_targets(&targets)?;
            drop(commander);

            let end = cube.position();
            println!(
                "drove {} targets in {} frames, cube at ({}, {})",
                report.targets, report.chunks, end.center_x, end.center_y
            );
            for e in registry.disconnect_all() {
                warn!("{}", e);
            }
        }

        CommandTask::Rename(cmd) => {
            if !cache.trace_names()?.contains(&cmd.old) {
                return Err(CubeTraceError::NoSuchTrace(cmd.old));
            }
            cache.rename_trace(&cmd.old, &cmd.new)?;
        }

        CommandTask::Delete(cmd) => {
            if !cache.trace_names()?.contains(&cmd.name) {
                return Err(CubeTraceError::NoSuchTrace(cmd.name));
            }
            cache.delete_trace(&cmd.name)?;
        }
    }
    Ok(())
}

fn replay(
    cache: &StrokeCache<DirStore>,
    config: &CubeConfig,
    cmd: ReplayCommand,
) -> Result<(), CubeTraceError> {
    let mut records = cache.get_records(&cmd.name)?;
    if records.is_empty() {
        return Err(CubeTraceError::NoSuchTrace(cmd.name));
    }
    let transform = Transform::new(&config.drawing)?;
    let upto = cmd.upto.unwrap_or(records.len() - 1);
    let mut sink = PrintSink::default();

    if cmd.animate {
        records.truncate(upto.saturating_add(1));
        let player = ReplayPlayer::new(records, transform, config.replay.step_interval());
        player.play(&mut sink, 0);
    } else {
        draw_up_to(&mut sink, &records, upto, &transform);
    }
    Ok(())
}

/// Prints each line the first time it is drawn, so an animated replay shows
/// up as a growing list rather than the whole picture over and over.
#[derive(Default)]
struct PrintSink {
    printed: usize,
    seen: usize,
    closed: usize,
}

impl StrokeSink for PrintSink {
    fn clear(&mut self) {
        self.seen = 0;
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), paint: &Paint) {
        self.seen += 1;
        if self.seen > self.printed {
            println!(
                "({:.1}, {:.1}) -> ({:.1}, {:.1}) {} a={} w={}",
                from.0, from.1, to.0, to.1, paint.color, paint.alpha, paint.line_width
            );
            self.printed = self.seen;
        }
    }

    fn finish_stroke(&mut self) {
        if self.seen == self.printed && self.closed != self.seen {
            println!("--");
            self.closed = self.seen;
        }
    }
}
