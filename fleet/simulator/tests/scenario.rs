use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use fleet_simulator::{
    helper::seeded_rng, AnomalyInjector, AnomalyProbabilities, ChannelSink, EntityIdentity,
    EntityStatus, FleetRoster, Simulator, SimulatorConfig, TelemetryPayload, Vehicle, Wheel,
    WorkerState,
};
use indexmap::IndexMap;
use proptest::prelude::*;

fn roster(vehicles: &[(&str, EntityStatus)], drivers: &[(&str, EntityStatus)]) -> FleetRoster {
    let map = |entries: &[(&str, EntityStatus)]| -> IndexMap<String, EntityStatus> {
        entries
            .iter()
            .map(|(id, status)| ((*id).to_string(), status.clone()))
            .collect()
    };
    FleetRoster {
        vehicles: map(vehicles),
        drivers: map(drivers),
    }
}

fn two_vehicles_one_driver() -> SimulatorConfig {
    SimulatorConfig {
        roster: roster(
            &[
                ("BUS_01", EntityStatus::Active),
                ("CAR_01", EntityStatus::Active),
                ("CAR_04", EntityStatus::Maintenance),
            ],
            &[
                ("DR_001", EntityStatus::Active),
                ("DR_007", EntityStatus::Retired),
            ],
        ),
        tick_seconds: 1.0,
        seed: Some(99),
        ..SimulatorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn three_ticks_of_two_vehicles_yield_six_payloads() {
    let config = SimulatorConfig {
        max_ticks: Some(3),
        ..two_vehicles_one_driver()
    };
    let sink = Arc::new(ChannelSink::new("fleet/telemetry", 64));
    let mut receiver = sink.subscribe();
    let mut simulator = Simulator::new(config, sink.clone(), None).unwrap();
    simulator.start().await.unwrap();
    let report = simulator.wait().await.unwrap();

    let mut received = Vec::new();
    while let Ok(payload) = receiver.try_recv() {
        received.push(payload);
    }
    assert_eq!(received.len(), 6);
    assert_eq!(report.published(), 6);
    assert!(received.iter().all(|p| p.driver_id == "DR_001"));
    for vehicle in ["BUS_01", "CAR_01"] {
        assert_eq!(received.iter().filter(|p| p.vehicle_id == vehicle).count(), 3);
        assert_eq!(report.entity(vehicle).unwrap().replay.len(), 3);
    }
    assert!(received.iter().all(|p| p.vehicle_id != "CAR_04"));

    for line in received.iter().map(|p| serde_json::to_string(p).unwrap()) {
        let parsed: TelemetryPayload = serde_json::from_str(&line).unwrap();
        assert!((-90.0..=90.0).contains(&parsed.lat));
        assert!((-180.0..=180.0).contains(&parsed.lon));
        assert!(parsed.speed_kph >= 0.0);
        assert!((0.0..=100.0).contains(&parsed.fuel_percent));
    }
}

#[tokio::test(start_paused = true)]
async fn nothing_is_published_after_workers_stop() {
    let sink = Arc::new(ChannelSink::new("fleet/telemetry", 256));
    let mut simulator = Simulator::new(two_vehicles_one_driver(), sink.clone(), None).unwrap();
    simulator.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(simulator
        .worker_states()
        .iter()
        .all(|state| *state == WorkerState::Running));

    let stop_requested = tokio::time::Instant::now();
    let report = simulator.stop().await.unwrap();
    assert!(stop_requested.elapsed() <= Duration::from_millis(1_200));
    assert_eq!(simulator.worker_states(), vec![WorkerState::Stopped; 2]);

    let published = sink.snapshot().len();
    assert_eq!(published as u64, report.published());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.snapshot().len(), published);
}

#[tokio::test(start_paused = true)]
async fn replay_keeps_only_the_most_recent_entries() {
    let config = SimulatorConfig {
        max_ticks: Some(7),
        replay_capacity: 5,
        ..two_vehicles_one_driver()
    };
    let sink = Arc::new(ChannelSink::new("fleet/telemetry", 64));
    let mut simulator = Simulator::new(config, sink.clone(), None).unwrap();
    simulator.start().await.unwrap();
    let report = simulator.wait().await.unwrap();

    let published = sink.snapshot();
    for entity in &report.entities {
        assert_eq!(entity.replay.len(), 5);
        let emitted: Vec<_> = published
            .iter()
            .filter(|p| p.vehicle_id == entity.identity.vehicle_id)
            .map(|p| p.event_id.clone())
            .collect();
        let kept: Vec<_> = entity.replay.iter().map(|p| p.event_id.clone()).collect();
        assert_eq!(kept, emitted[2..]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn physical_fields_stay_clamped_under_random_anomalies(
        seed in any::<u64>(),
        steps in 1usize..300,
        tick in 0.1f64..120.0,
        overheat in 0.0f64..=1.0,
        siphon in 0.0f64..=1.0,
        leak in 0.0f64..=1.0,
        brake in 0.0f64..=1.0,
    ) {
        let mut rng = seeded_rng(seed);
        let identity = EntityIdentity {
            vehicle_id: "BUS_06".into(),
            driver_id: "DR_005".into(),
        };
        let mut vehicle = Vehicle::new(identity, 6.45, 3.39, &mut rng);
        let injector = AnomalyInjector::new(AnomalyProbabilities {
            overheat_spike: overheat,
            fuel_siphon: siphon,
            tyre_leak: leak,
            harsh_brake: brake,
        });
        let mut now = Utc.with_ymd_and_hms(2025, 12, 11, 6, 0, 0).unwrap();
        for _ in 0..steps {
            now += ChronoDuration::milliseconds((tick * 1000.0) as i64);
            vehicle.step(tick, now, &mut rng);
            prop_assert!(vehicle.state().within_bounds());
            injector.apply(&mut vehicle, now, &mut rng);
            prop_assert!(vehicle.state().within_bounds());
            for wheel in Wheel::ALL {
                let psi = vehicle.state().tire_psi.get(wheel);
                prop_assert!(
                    psi >= 18.0 || vehicle.markers().leaking(wheel, now),
                    "{wheel:?} at {psi} psi without an open leak"
                );
                prop_assert!(psi <= 40.0);
            }

            let payload = TelemetryPayload::from_vehicle(&vehicle, now);
            let decoded: TelemetryPayload =
                serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
            prop_assert_eq!(decoded, payload);
        }
    }
}
