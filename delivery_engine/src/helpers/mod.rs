mod order_number;
mod pricing;

pub use order_number::{generate_order_number, is_valid_order_number};
pub use pricing::{
    calculate_delivery_fee,
    calculate_tax,
    estimate_travel_minutes,
    haversine_km,
    price_order,
    GeoPoint,
    PricedOrder,
    PricingPolicy,
};
