//! Ferry Runtime
//!
//! Demo frame loop over a small courier task graph. Pass a JSON settings
//! file as the only argument to override the defaults.

mod demo;
mod settings;

use anyhow::{Context, Result};
use demo::CourierDemo;
use ferry_core::{Entity, JobHandle, JobScheduler, TaskGraph};
use ferry_metrics::{Counter, FrameTimer};
use settings::RuntimeSettings;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let settings = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => RuntimeSettings::load(&path)?,
        None => RuntimeSettings::default(),
    };
    init_tracing(&settings.log_filter);
    info!("Ferry v{}", ferry_core::VERSION);

    let scheduler = JobScheduler::new(settings.ferry.clone()).context("starting worker pool")?;
    info!(
        workers = scheduler.worker_count(),
        lanes = scheduler.lane_count(),
        "worker pool ready"
    );

    let mut graph = TaskGraph::new(&scheduler)?;
    let demo = CourierDemo::build(&mut graph)?;
    graph.harden()?;
    for (stage, jobs) in graph.execution_stages().iter().enumerate() {
        info!(stage, ?jobs, "execution stage");
    }
    info!("cancel flows:\n{}", graph.describe_cancel_flows());

    demo.dispatch(&graph, settings.entities)?;

    let mut timer = FrameTimer::new(60);
    let mut counter = Counter::new();
    let mut cancelled = 0;
    for frame in 1..=settings.frames {
        timer.begin();
        if settings.cancel_every > 0 && frame % settings.cancel_every == 0 && cancelled < settings.entities {
            graph.request_cancel(demo.couriers, Entity::new(cancelled, 0))?;
            cancelled += 1;
        }
        graph
            .update(&JobHandle::completed())?
            .wait()
            .with_context(|| format!("frame {frame} failed"))?;
        timer.end();

        let back = graph.complete_reader().completed_for(demo.couriers);
        if !back.is_empty() {
            info!(frame, couriers = ?back, "cancelled couriers back at base");
        }
        graph.record_metrics(&mut counter);
    }

    let (min_ms, max_ms) = timer.frame_time_range_ms();
    info!(
        frames = timer.frames(),
        fps = timer.fps(),
        frame_ms = timer.frame_time_ms(),
        min_ms,
        max_ms,
        delivered = demo.delivered(),
        cancelled,
        "run finished"
    );
    for (stage, time) in graph.profiler().iter() {
        info!(stage, ?time, "stage scheduling time");
    }
    for (name, value) in counter.iter() {
        debug!(counter = name, value);
    }
    println!("{}", serde_json::to_string_pretty(&graph.profiles())?);

    graph
        .dispose_async(&JobHandle::completed())?
        .wait()
        .context("disposing task graph")?;
    Ok(())
}

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(env_filter).try_init();
}
