//! Warehouse allocator.
//!
//! Decides, before any routing happens, which customers the fleet can carry
//! at all. Customers that survive go to the solver; the rest stay in the
//! warehouse list. Sorting small-and-far first hands the router the densest
//! candidate pool while refusing large outliers up front.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::info;

use crate::geo::{haversine_m, Coordinate};
use crate::model::{Customer, VehicleSpec};

/// Why a customer ended up in the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseReason {
    /// Demand exceeds every single vehicle's capacity.
    ExceedsVehicleCapacity,
    /// Demand exceeds the per-customer policy ceiling.
    ExceedsPolicyCap,
    /// The fleet's total capacity is already spoken for.
    FleetFull,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseEntry {
    pub customer_id: String,
    pub reason: WarehouseReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Allocation {
    /// Customers the solver will route, in admission order.
    pub serviceable: Vec<Customer>,
    pub warehouse: Vec<WarehouseEntry>,
    /// Admitted demand over total fleet capacity, in [0, 1].
    pub utilization: f64,
}

/// Partition `customers` into serviceable and warehouse sets.
///
/// Admission walks customers ordered by (demand ascending, distance from the
/// central depot descending, id) and accumulates against the fleet's total
/// capacity. The sort keys make the split deterministic for a fixed input.
pub fn allocate(
    customers: &[Customer],
    fleet: &[VehicleSpec],
    policy_volume_cap: f64,
    central_depot: Coordinate,
) -> Allocation {
    let enabled: Vec<&VehicleSpec> = fleet.iter().filter(|v| v.enabled).collect();
    let capacity_total: f64 = enabled
        .iter()
        .map(|v| f64::from(v.capacity) * f64::from(v.count))
        .sum();
    let capacity_max_single = enabled
        .iter()
        .map(|v| f64::from(v.capacity))
        .fold(0.0f64, f64::max);

    let mut ordered: Vec<&Customer> = customers.iter().collect();
    ordered.sort_by(|a, b| {
        a.volume
            .partial_cmp(&b.volume)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let da = haversine_m(a.coordinate, central_depot);
                let db = haversine_m(b.coordinate, central_depot);
                db.partial_cmp(&da).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut allocation = Allocation::default();
    let mut used = 0.0f64;

    for customer in ordered {
        if customer.volume > capacity_max_single {
            allocation.warehouse.push(WarehouseEntry {
                customer_id: customer.id.clone(),
                reason: WarehouseReason::ExceedsVehicleCapacity,
            });
        } else if customer.volume > policy_volume_cap {
            allocation.warehouse.push(WarehouseEntry {
                customer_id: customer.id.clone(),
                reason: WarehouseReason::ExceedsPolicyCap,
            });
        } else if used + customer.volume <= capacity_total {
            used += customer.volume;
            allocation.serviceable.push(customer.clone());
        } else {
            allocation.warehouse.push(WarehouseEntry {
                customer_id: customer.id.clone(),
                reason: WarehouseReason::FleetFull,
            });
        }
    }

    allocation.utilization = if capacity_total > 0.0 {
        used / capacity_total
    } else {
        0.0
    };

    info!(
        serviceable = allocation.serviceable.len(),
        warehouse = allocation.warehouse.len(),
        utilization = allocation.utilization,
        "warehouse allocation complete"
    );
    allocation
}
