use serde::{Deserialize, Serialize};

use crate::db_types::Money;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Builds a point only if both coordinates are known.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        Some(Self::new(latitude?, longitude?))
    }
}

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// The knobs of order pricing and delivery estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    /// Tax rate in basis points. 800 is 8%.
    pub tax_rate_bps: i64,
    /// Distance covered by the restaurant's base delivery fee.
    pub included_distance_km: f64,
    /// Surcharge per kilometre beyond `included_distance_km`, in minor units.
    pub per_km_fee: Money,
    pub courier_speed_kmh: f64,
    /// Travel estimate when either end of the trip has no coordinates.
    pub default_travel_minutes: i64,
    /// Preparation estimate when the restaurant does not state one.
    pub default_preparation_minutes: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate_bps: 800,
            included_distance_km: 3.0,
            per_km_fee: Money::from(50),
            courier_speed_kmh: 30.0,
            default_travel_minutes: 15,
            default_preparation_minutes: 30,
        }
    }
}

/// Distance-tiered delivery fee: the base fee covers the first `included_distance_km`, every kilometre after that
/// adds `per_km_fee`. Without a distance, the base fee applies.
pub fn calculate_delivery_fee(base_fee: Money, distance_km: Option<f64>, policy: &PricingPolicy) -> Money {
    match distance_km {
        Some(d) if d > policy.included_distance_km => {
            let extra = (d - policy.included_distance_km) * policy.per_km_fee.value() as f64;
            #[allow(clippy::cast_possible_truncation)]
            let extra = Money::from(extra.round() as i64);
            base_fee + extra
        },
        _ => base_fee,
    }
}

pub fn calculate_tax(subtotal: Money, policy: &PricingPolicy) -> Money {
    subtotal.apply_basis_points(policy.tax_rate_bps)
}

pub fn estimate_travel_minutes(distance_km: Option<f64>, policy: &PricingPolicy) -> i64 {
    match distance_km {
        Some(d) if policy.courier_speed_kmh > 0.0 => {
            #[allow(clippy::cast_possible_truncation)]
            let minutes = (d / policy.courier_speed_kmh * 60.0).ceil() as i64;
            minutes.max(1)
        },
        _ => policy.default_travel_minutes,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedOrder {
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub tax_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
}

/// Computes all money fields of an order. The discount is clamped to `[0, subtotal]` so the total can never go
/// negative. Returns `None` if the total does not fit in a [`Money`].
pub fn price_order(
    subtotal: Money,
    base_fee: Money,
    distance_km: Option<f64>,
    discount: Money,
    policy: &PricingPolicy,
) -> Option<PricedOrder> {
    let delivery_fee = calculate_delivery_fee(base_fee, distance_km, policy);
    let tax_amount = calculate_tax(subtotal, policy);
    let discount_amount = discount.clamp(Money::default(), subtotal);
    let total_amount = subtotal.checked_add(delivery_fee)?.checked_add(tax_amount)?.checked_sub(discount_amount)?;
    Some(PricedOrder { subtotal, delivery_fee, tax_amount, discount_amount, total_amount })
}
