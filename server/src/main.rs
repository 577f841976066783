use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tokio::sync::{watch, RwLock};

use server::ai::spline::AiSpline;
use server::ai::{AiDirector, AiMode, ObstacleDetector};
use server::automod::AutoModerationDirector;
use server::config::{AiParams, AutoModerationParams};
use server::entry_car::EntryCar;
use server::entry_car_manager::{EntryCarManager, Outbound};
use server::scripts::CspScriptProvider;
use server::session::{SessionManager, SunPosition, WeatherManager};

/// AI-debug companion script, registered only with `--debug`.
const AI_DEBUG_LUA: &str = r#"-- renders AiDebug telemetry above traffic cars
ac.onServerPacket(function(packet) storeAiDebug(packet) end)
"#;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// AI spline cache to load
    #[clap(short, long)]
    spline: PathBuf,

    /// Number of AI-only traffic slots
    #[clap(long, default_value = "12")]
    ai_slots: usize,

    /// Number of player-connectable slots
    #[clap(long, default_value = "12")]
    player_slots: usize,

    /// Enable the AI debug telemetry side-channel
    #[clap(long)]
    debug: bool,

    /// Seed for the director RNGs (reproducible traffic)
    #[clap(long)]
    seed: Option<u64>,

    /// Sun altitude in degrees, omit for tracks without astronomy
    #[clap(long)]
    sun_altitude: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();

    let spline = Arc::new(AiSpline::load(&args.spline)?);
    info!("Spline ready: {} points", spline.len());

    let ai_params = AiParams {
        debug: args.debug,
        ..Default::default()
    };
    ai_params.validate()?;
    let ai_params = Arc::new(ai_params);
    let automod_params = AutoModerationParams::default();

    // Entry list: players first, then the fixed traffic slots
    let mut entry_cars = Vec::new();
    for i in 0..args.player_slots {
        entry_cars.push(EntryCar::new(i as u8, "road_car", AiMode::None));
    }
    for i in 0..args.ai_slots {
        entry_cars.push(EntryCar::new(
            (args.player_slots + i) as u8,
            "traffic_sedan",
            AiMode::Fixed,
        ));
    }

    let (manager, outbound_rx) = EntryCarManager::new(entry_cars);
    let manager = Arc::new(RwLock::new(manager));
    let session = Arc::new(SessionManager::new());
    let weather = Arc::new(WeatherManager::new(args.sun_altitude.map(|altitude_deg| {
        SunPosition {
            altitude_deg,
            azimuth_deg: 0.0,
        }
    })));
    let mut scripts = CspScriptProvider::new();

    // Fatal on misconfiguration, before any worker starts
    let automod = AutoModerationDirector::new(
        Arc::clone(&manager),
        Arc::clone(&session),
        Arc::clone(&weather),
        Some(Arc::clone(&spline)),
        automod_params,
        ai_params.lane_width_m,
        &mut scripts,
    )?;

    if args.debug {
        scripts.add_script(AI_DEBUG_LUA, "ai_debug.lua");
    }

    let mut director = AiDirector::new(
        Arc::clone(&manager),
        Arc::clone(&session),
        Arc::clone(&spline),
        Arc::clone(&ai_params),
        args.seed,
    );
    {
        let mut manager = manager.write().await;
        director.adjust_overbooking(&mut manager);
    }

    let obstacle = ObstacleDetector::new(
        Arc::clone(&manager),
        Arc::clone(&session),
        Arc::clone(&spline),
        Arc::clone(&ai_params),
        args.seed,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let director_task = tokio::spawn(director.run(shutdown_rx.clone()));
    let obstacle_task = tokio::spawn(obstacle.run(shutdown_rx.clone()));
    let automod_task = tokio::spawn(automod.run(shutdown_rx.clone()));

    // Stand-in for the network layer: drain the outbound queue
    let drain_task = tokio::spawn(async move {
        let mut outbound_rx = outbound_rx;
        while let Some(message) = outbound_rx.recv().await {
            match message {
                Outbound::Kick { session_id, reason } => {
                    info!("(transport) kick session {}: {}", session_id, reason)
                }
                other => log::debug!("(transport) {:?}", other),
            }
        }
    });

    info!("Extensions running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if shutdown_tx.send(true).is_err() {
        warn!("All workers already stopped");
    }
    let _ = tokio::join!(director_task, obstacle_task, automod_task);
    drop(shutdown_tx);
    drain_task.abort();

    Ok(())
}
