//! Whole-pipeline tests.
//!
//! No routing server is listening on the configured ports, so these runs
//! exercise the degradation ladder: provider refused, cells estimated by
//! great-circle, solution marked degraded. The business outcomes must still
//! hold.

use fleet_planner::model::{validate_customers, Customer, CustomerRecord};
use fleet_planner::planner::Planner;
use fleet_planner::config::PlannerConfig;

fn test_config(cache_dir: &std::path::Path) -> PlannerConfig {
    let json = format!(
        r#"{{
            "routing": {{
                "engine": "static",
                "static_url": "http://127.0.0.1:1",
                "time_dependent_url": "http://127.0.0.1:1",
                "request_timeout_secs": 1
            }},
            "locations": {{
                "center_location": {{"lat": 42.6977, "lon": 23.3219}},
                "city_center_coords": {{"lat": 42.6977, "lon": 23.3219}}
            }},
            "vehicles": [
                {{
                    "class": "internal",
                    "capacity": 100,
                    "count": 2,
                    "max_time_minutes": 480,
                    "service_minutes": 5,
                    "start_depot": {{"lat": 42.70, "lon": 23.32}}
                }},
                {{
                    "class": "center",
                    "capacity": 60,
                    "count": 1,
                    "max_time_minutes": 480,
                    "service_minutes": 5,
                    "start_depot": {{"lat": 42.70, "lon": 23.32}}
                }}
            ],
            "cvrp": {{"time_limit_seconds": 1}},
            "warehouse": {{"policy_volume_cap": 90}},
            "cache": {{"directory": "{cache_dir}"}}
        }}"#,
        cache_dir = cache_dir.display()
    );
    PlannerConfig::from_json_str(&json).expect("test config parses")
}

fn town_customers() -> Vec<Customer> {
    let records = vec![
        CustomerRecord {
            id: "c1".into(),
            name: "Shop 1".into(),
            lat: 42.701,
            lon: 23.325,
            volume: 20.0,
        },
        CustomerRecord {
            id: "c2".into(),
            name: "Shop 2".into(),
            lat: 42.712,
            lon: 23.338,
            volume: 30.0,
        },
        CustomerRecord {
            id: "c3".into(),
            name: "Shop 3".into(),
            lat: 42.690,
            lon: 23.310,
            volume: 25.0,
        },
        CustomerRecord {
            id: "oversized".into(),
            name: "Depot-only".into(),
            lat: 42.695,
            lon: 23.330,
            volume: 500.0,
        },
    ];
    let (customers, problems) = validate_customers(&records);
    assert!(problems.is_empty());
    customers
}

#[test]
fn plan_routes_everything_serviceable_and_flags_degradation() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::new(test_config(dir.path())).unwrap();

    let customers = town_customers();
    let outcome = planner.plan(&customers).unwrap();

    // The oversized customer never reaches the solver.
    assert_eq!(outcome.warehouse.len(), 1);
    assert_eq!(outcome.warehouse[0].customer_id, "oversized");

    // Everyone else is routed; nothing dropped.
    let routed: usize = outcome.solution.routes.iter().map(|r| r.stops()).sum();
    assert_eq!(routed, 3);
    assert!(outcome.solution.dropped.is_empty());

    // No provider was reachable: cells were estimated and the solution says so.
    assert!(outcome.degraded_cells > 0);
    assert!(outcome.solution.degraded);

    // Per-route duration includes the 5-minute service stops.
    for route in &outcome.solution.routes {
        assert!(route.total_duration_s >= 300 * route.stops() as i64);
    }
}

#[test]
fn empty_input_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::new(test_config(dir.path())).unwrap();
    let err = planner.plan(&[]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn disabled_fleet_returns_empty_solution_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    for vehicle in &mut config.vehicles {
        vehicle.enabled = false;
    }
    let planner = Planner::new(config).unwrap();

    let customers = town_customers();
    let outcome = planner.plan(&customers).unwrap();
    assert!(outcome.solution.routes.is_empty());
    assert_eq!(outcome.warehouse.len(), customers.len());
    assert_eq!(outcome.utilization, 0.0);
}

#[test]
fn unknown_config_keys_are_rejected() {
    let json = r#"{
        "routing": {"engine": "static", "turbo_mode": true},
        "locations": {
            "center_location": {"lat": 42.6977, "lon": 23.3219},
            "city_center_coords": {"lat": 42.6977, "lon": 23.3219}
        },
        "vehicles": [
            {"class": "internal", "capacity": 10, "count": 1,
             "max_time_minutes": 60, "start_depot": {"lat": 42.7, "lon": 23.32}}
        ]
    }"#;
    assert!(PlannerConfig::from_json_str(json).is_err());
}
