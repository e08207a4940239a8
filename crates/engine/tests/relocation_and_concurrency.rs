//! Relocation, feature prediction and concurrent access through the
//! public Engine API.

use analyst_core::{
    DepthRestraintType, DetectionTiming, EngineError, Event, EventHypothesis, EventPatch,
    EventStatus, NewDetection, PhaseType, PreferredEventHypothesis, Station,
};
use analyst_engine::simulated::{SimulatedLocationService, SimulatedPredictionService};
use analyst_engine::{Engine, EngineConfig, InMemoryStationDirectory};
use std::sync::Arc;
use std::time::Duration;

fn station(id: &str, lat: f64, lon: f64) -> Station {
    Station {
        id: id.to_string(),
        name: id.to_string(),
        latitude_degrees: lat,
        longitude_degrees: lon,
        elevation_km: 0.0,
        default_channel_name: "fkb".to_string(),
    }
}

fn engine_with(config: EngineConfig, locator: SimulatedLocationService) -> Engine {
    Engine::new(
        config,
        Arc::new(InMemoryStationDirectory::new(vec![
            station("S1", 10.0, 20.0),
            station("S2", 12.0, 22.0),
            station("S3", 8.0, 25.0),
        ])),
        Arc::new(locator),
        Arc::new(SimulatedPredictionService::new()),
    )
    .expect("config is valid")
}

fn pick(station_id: &str, arrival_time: f64) -> NewDetection {
    NewDetection {
        station_id: station_id.to_string(),
        phase: PhaseType::P,
        timing: DetectionTiming {
            arrival_time,
            time_uncertainty_sec: 0.5,
            amplitude_measurement: None,
        },
    }
}

/// Event with two associated picks; returns (event id, hypothesis id,
/// preferred solution id)
async fn located_event(engine: &Engine) -> (String, String, String) {
    let a = engine.create_detection(pick("S1", 1000.0)).await;
    let b = engine.create_detection(pick("S2", 1004.0)).await;
    let creation = engine
        .create_event(&[a.current().id.clone(), b.current().id.clone()])
        .await
        .unwrap();
    let hyp = creation.event.current_hypothesis();
    let solution_id = hyp.preferred_location().unwrap().id.clone();
    (creation.event.id.clone(), hyp.id.clone(), solution_id)
}

#[tokio::test]
async fn test_locate_adds_one_set_with_three_regimes() {
    let engine = engine_with(EngineConfig::default(), SimulatedLocationService::new());
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;

    let located = engine
        .locate_event(&hyp_id, &solution_id, Vec::new())
        .await
        .unwrap();
    assert_eq!(located.location_solution_sets.len(), 2);
    let set = &located.location_solution_sets[1];
    assert_eq!(set.count, 1);
    let mut regimes: Vec<DepthRestraintType> = set
        .location_solutions
        .iter()
        .map(|ls| ls.depth_restraint_type())
        .collect();
    regimes.sort();
    let mut expected = DepthRestraintType::ALL.to_vec();
    expected.sort();
    assert_eq!(regimes, expected);

    let preferred = located.preferred_location().unwrap();
    assert_eq!(preferred.depth_restraint_type(), DepthRestraintType::Unrestrained);
    assert!(set.location_solutions.iter().any(|ls| ls.id == preferred.id));
    assert_eq!(preferred.snapshots.len(), 2);

    let event = engine.event(&event_id).await.unwrap();
    assert_eq!(event.current_hypothesis(), &located);
    assert!(engine.index_is_consistent().await);
}

#[tokio::test]
async fn test_failed_relocation_leaves_hypothesis_unchanged() {
    let engine = engine_with(
        EngineConfig::default(),
        SimulatedLocationService::new().failing_all(),
    );
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;
    let before = engine.event(&event_id).await.unwrap();

    let err = engine
        .locate_event(&hyp_id, &solution_id, Vec::new())
        .await
        .unwrap_err();
    match err {
        EngineError::RelocationFailed {
            event_hypothesis_id,
            reasons,
        } => {
            assert_eq!(event_hypothesis_id, hyp_id);
            assert_eq!(reasons.len(), 3);
        }
        other => panic!("expected RelocationFailed, got {:?}", other),
    }

    let after = engine.event(&event_id).await.unwrap();
    assert_eq!(after.current_hypothesis(), before.current_hypothesis());
    assert_eq!(after.hypotheses.len(), before.hypotheses.len());
}

#[tokio::test]
async fn test_partial_solution_set_falls_back_in_priority_order() {
    let engine = engine_with(
        EngineConfig::default(),
        SimulatedLocationService::new().failing(DepthRestraintType::Unrestrained),
    );
    let (_, hyp_id, solution_id) = located_event(&engine).await;

    let located = engine
        .locate_event(&hyp_id, &solution_id, Vec::new())
        .await
        .unwrap();
    let set = located.location_solution_sets.last().unwrap();
    assert_eq!(set.location_solutions.len(), 2);
    let preferred = located.preferred_location().unwrap();
    assert_eq!(preferred.depth_restraint_type(), DepthRestraintType::FixedAtSurface);
    assert_eq!(preferred.location.depth_km, 0.0);
}

#[tokio::test]
async fn test_complete_solution_set_can_be_required() {
    let config = EngineConfig {
        require_complete_solution_set: true,
        ..Default::default()
    };
    let engine = engine_with(
        config,
        SimulatedLocationService::new().failing(DepthRestraintType::FixedAtDepth),
    );
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;

    let err = engine
        .locate_event(&hyp_id, &solution_id, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RelocationFailed { .. }));
    let event = engine.event(&event_id).await.unwrap();
    assert_eq!(event.current_hypothesis().location_solution_sets.len(), 1);
}

#[tokio::test]
async fn test_slow_locator_times_out_without_writing() {
    let engine = engine_with(
        EngineConfig::default(),
        SimulatedLocationService::new().with_delay(Duration::from_millis(500)),
    );
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;

    let err = engine
        .locate_event_with_timeout(
            &hyp_id,
            &solution_id,
            Vec::new(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RelocationFailed { .. }));
    let event = engine.event(&event_id).await.unwrap();
    assert_eq!(event.current_hypothesis().location_solution_sets.len(), 1);
}

#[tokio::test]
async fn test_locate_from_unknown_solution_is_not_found() {
    let engine = engine_with(EngineConfig::default(), SimulatedLocationService::new());
    let (_, hyp_id, _) = located_event(&engine).await;
    let err = engine
        .locate_event(&hyp_id, "no-such-solution", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_open_for_refinement_computes_predictions() {
    let engine = engine_with(EngineConfig::default(), SimulatedLocationService::new());
    let (event_id, _, _) = located_event(&engine).await;

    let event = engine
        .update_event(
            &event_id,
            EventPatch {
                status: Some(EventStatus::OpenForRefinement),
                active_analyst_user_names: Some(vec!["analyst-1".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(event.status, EventStatus::OpenForRefinement);
    assert_eq!(event.active_analyst_user_names, vec!["analyst-1".to_string()]);

    let preferred = event.current_hypothesis().preferred_location().unwrap();
    assert!(!preferred.feature_predictions.is_empty());
    assert!(preferred
        .feature_predictions
        .iter()
        .all(|fp| ["S1", "S2", "S3"].contains(&fp.station_id.as_str())));
    assert!(engine.index_is_consistent().await);
}

#[tokio::test]
async fn test_association_waits_for_running_relocation() {
    let engine = Arc::new(engine_with(
        EngineConfig::default(),
        SimulatedLocationService::new().with_delay(Duration::from_millis(100)),
    ));
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;
    let extra = engine.create_detection(pick("S3", 1006.0)).await;
    let extra_hyp = extra.current().id.clone();

    let locate = {
        let engine = Arc::clone(&engine);
        let hyp_id = hyp_id.clone();
        tokio::spawn(async move { engine.locate_event(&hyp_id, &solution_id, Vec::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let associate = {
        let engine = Arc::clone(&engine);
        let hyp_id = hyp_id.clone();
        let ids = vec![extra_hyp.clone()];
        tokio::spawn(async move { engine.change_associations(&hyp_id, &ids, true).await })
    };

    let located = locate.await.unwrap().unwrap();
    associate.await.unwrap().unwrap();

    // the association landed after the relocation committed
    assert_eq!(located.associations.len(), 2);
    let event = engine.event(&event_id).await.unwrap();
    let hyp = event.current_hypothesis();
    assert_eq!(hyp.associations.len(), 3);
    assert_eq!(hyp.location_solution_sets.len(), 2);
    assert!(hyp
        .preferred_location()
        .unwrap()
        .location_behaviors
        .iter()
        .any(|b| extra
            .current()
            .feature_measurements
            .iter()
            .any(|fm| fm.id == b.feature_measurement_id)));
    assert!(engine.index_is_consistent().await);
}

#[tokio::test]
async fn test_concurrent_edits_on_different_events_stay_consistent() {
    let engine = Arc::new(engine_with(
        EngineConfig::default(),
        SimulatedLocationService::new(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let station = ["S1", "S2", "S3"][i % 3];
            let d = engine
                .create_detection(pick(station, 1000.0 + i as f64))
                .await;
            let creation = engine.create_event(&[d.current().id.clone()]).await?;
            let hyp = creation.event.current_hypothesis();
            let solution_id = hyp.preferred_location().map(|ls| ls.id.clone());
            engine
                .locate_event(&hyp.id, &solution_id.unwrap_or_default(), Vec::new())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let events = engine.read(|s| s.events().len()).await;
    assert_eq!(events, 8);
    assert!(engine.index_is_consistent().await);
}

#[tokio::test]
async fn test_refinement_without_location_leaves_event_unchanged() {
    let engine = engine_with(EngineConfig::default(), SimulatedLocationService::new());
    let hypothesis = EventHypothesis::empty("ev-n");
    let preferred = PreferredEventHypothesis {
        processing_stage_id: engine.config().initial_stage_id.clone(),
        event_hypothesis_id: hypothesis.id.clone(),
    };
    let event = Event::from_persisted("ev-n", "CTBTO", vec![hypothesis], vec![preferred]).unwrap();
    engine.hydrate_events(vec![event]).await;
    let before = engine.event("ev-n").await.unwrap();

    let err = engine
        .update_event(
            "ev-n",
            EventPatch {
                status: Some(EventStatus::OpenForRefinement),
                active_analyst_user_names: Some(vec!["analyst-1".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let after = engine.event("ev-n").await.unwrap();
    assert_eq!(after.status, EventStatus::ReadyForRefinement);
    assert!(after.active_analyst_user_names.is_empty());
    assert_eq!(after, before);
    assert!(engine.index_is_consistent().await);
}

#[tokio::test]
async fn test_locate_uses_given_behaviors_or_keeps_the_starting_ones() {
    let engine = engine_with(EngineConfig::default(), SimulatedLocationService::new());
    let (event_id, hyp_id, solution_id) = located_event(&engine).await;
    let start = engine.event(&event_id).await.unwrap();
    let start_behaviors = start
        .current_hypothesis()
        .preferred_location()
        .unwrap()
        .location_behaviors
        .clone();
    assert!(!start_behaviors.is_empty());

    // empty list: the starting solution's behaviors carry over
    let located = engine
        .locate_event(&hyp_id, &solution_id, Vec::new())
        .await
        .unwrap();
    let kept: Vec<&str> = located
        .preferred_location()
        .unwrap()
        .location_behaviors
        .iter()
        .map(|b| b.feature_measurement_id.as_str())
        .collect();
    let expected: Vec<&str> = start_behaviors
        .iter()
        .map(|b| b.feature_measurement_id.as_str())
        .collect();
    assert_eq!(kept, expected);

    // explicit list: it replaces them
    let chosen = vec![start_behaviors[0].clone()];
    let preferred_id = located.preferred_location().unwrap().id.clone();
    let located = engine
        .locate_event(&located.id, &preferred_id, chosen.clone())
        .await
        .unwrap();
    let behaviors = &located.preferred_location().unwrap().location_behaviors;
    assert_eq!(behaviors.len(), 1);
    assert_eq!(behaviors[0].feature_measurement_id, chosen[0].feature_measurement_id);
}
