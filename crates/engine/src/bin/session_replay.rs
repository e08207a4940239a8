//! session_replay - Drive a scripted analyst session through the engine
//!
//! Runs a fixed sequence of analyst actions (picks, event creation,
//! conflicting association, re-pick, refinement, relocation, save) against
//! the simulated location and prediction services and prints each step's
//! change payload as JSON.
//!
//! Usage:
//!   session_replay
//!   session_replay --config engine.yaml --fail-restraint fixed_at_depth
//!   session_replay --log-dir ./logs --pretty

use analyst_core::{
    DepthRestraintType, DetectionPatch, DetectionTiming, EventPatch, EventStatus, NewDetection,
    PhaseType, Station,
};
use analyst_engine::simulated::{SimulatedLocationService, SimulatedPredictionService};
use analyst_engine::{init_logging, Engine, EngineConfig, InMemoryStationDirectory, LoggingConfig};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Scripted analyst session against simulated services
#[derive(Parser, Debug)]
#[command(name = "session_replay")]
#[command(about = "Replay a scripted analyst session and print the change payloads")]
struct Args {
    /// Engine configuration (YAML or JSON); defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for a daily-rolling log file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Make the simulated locator fail this depth regime
    /// (unrestrained, fixed_at_surface, fixed_at_depth)
    #[arg(long, value_parser = parse_restraint)]
    fail_restraint: Vec<DepthRestraintType>,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

fn parse_restraint(value: &str) -> Result<DepthRestraintType, String> {
    DepthRestraintType::ALL
        .iter()
        .copied()
        .find(|r| r.as_str() == value)
        .ok_or_else(|| format!("unknown depth restraint: {}", value))
}

#[derive(Serialize)]
struct Step<'a, T: Serialize> {
    step: &'a str,
    result: &'a T,
}

struct Printer {
    pretty: bool,
}

impl Printer {
    fn print<T: Serialize>(&self, step: &str, result: &T) -> Result<(), serde_json::Error> {
        let step = Step { step, result };
        let json = if self.pretty {
            serde_json::to_string_pretty(&step)?
        } else {
            serde_json::to_string(&step)?
        };
        println!("{}", json);
        Ok(())
    }
}

fn stations() -> Vec<Station> {
    [
        ("ASAR", -23.665, 133.905),
        ("WRA", -19.942, 134.339),
        ("MKAR", 46.794, 82.290),
    ]
    .into_iter()
    .map(|(name, lat, lon)| Station {
        id: name.to_string(),
        name: name.to_string(),
        latitude_degrees: lat,
        longitude_degrees: lon,
        elevation_km: 0.0,
        default_channel_name: "beam".to_string(),
    })
    .collect()
}

fn pick(station_id: &str, phase: PhaseType, arrival_time: f64) -> NewDetection {
    NewDetection {
        station_id: station_id.to_string(),
        phase,
        timing: DetectionTiming {
            arrival_time,
            time_uncertainty_sec: 0.5,
            amplitude_measurement: None,
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _log_guard = init_logging(&LoggingConfig {
        log_dir: args.log_dir.clone(),
        default_filter: None,
    });

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let mut locator = SimulatedLocationService::new();
    for restraint in &args.fail_restraint {
        locator = locator.failing(*restraint);
    }
    let engine = Engine::new(
        config,
        Arc::new(InMemoryStationDirectory::new(stations())),
        Arc::new(locator),
        Arc::new(SimulatedPredictionService::new()),
    )?;
    let out = Printer {
        pretty: args.pretty,
    };

    // Picks
    let asar = engine.create_detection(pick("ASAR", PhaseType::P, 1000.0)).await;
    let wra = engine.create_detection(pick("WRA", PhaseType::P, 1004.5)).await;
    let mkar = engine.create_detection(pick("MKAR", PhaseType::Pn, 1180.0)).await;
    out.print("create_detections", &vec![&asar, &wra, &mkar])?;

    // First event from the two Australian picks, then persist
    let first = engine
        .create_event(&[asar.current().id.clone(), wra.current().id.clone()])
        .await?;
    out.print("create_event", &first)?;
    out.print("save", &engine.save().await?)?;

    // A second event claiming the same ASAR pick
    let second = engine.create_event(&[mkar.current().id.clone()]).await?;
    let second_hypothesis = second.event.current_hypothesis().id.clone();
    let asar_hypothesis = vec![asar.current().id.clone()];
    let change = engine
        .change_associations(&second_hypothesis, &asar_hypothesis, true)
        .await?;
    out.print("associate_conflicting", &change)?;
    out.print("conflicts", &engine.get_conflicts(&asar_hypothesis).await)?;

    let second_hypothesis = change
        .events
        .iter()
        .find(|e| e.id == second.event.id)
        .map(|e| e.current_hypothesis().id.clone())
        .unwrap_or(second_hypothesis);
    let change = engine
        .change_associations(&second_hypothesis, &asar_hypothesis, false)
        .await?;
    out.print("disassociate", &change)?;
    out.print("conflicts", &engine.get_conflicts(&asar_hypothesis).await)?;

    // Re-pick WRA as S; the persisted hypothesis is superseded
    let change = engine
        .update_detection(&wra.id, DetectionPatch::phase(PhaseType::S))
        .await?;
    out.print("update_detection", &change)?;

    // Open the first event for refinement (computes feature predictions)
    let event = engine
        .update_event(
            &first.event.id,
            EventPatch {
                status: Some(EventStatus::OpenForRefinement),
                active_analyst_user_names: Some(vec!["analyst".to_string()]),
                ..Default::default()
            },
        )
        .await?;
    out.print("open_for_refinement", &event)?;

    // Relocate from the current preferred solution
    let hypothesis = event.current_hypothesis();
    let solution_id = hypothesis
        .preferred_location()
        .map(|ls| ls.id.clone())
        .unwrap_or_default();
    match engine
        .locate_event(&hypothesis.id, &solution_id, Vec::new())
        .await
    {
        Ok(located) => out.print("locate", &located)?,
        Err(err) => out.print("locate_failed", &err.to_report())?,
    }

    out.print("save", &engine.save().await?)?;
    if !engine.index_is_consistent().await {
        return Err("association index drifted from the event store".into());
    }
    Ok(())
}
