use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use delivery_common::Money;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

macro_rules! id_type {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl $name {
            pub fn value(&self) -> i64 {
                self.0
            }
        }
    };
}

id_type!(OrderId, "order");
id_type!(PaymentId, "payment");
id_type!(UserId, "user");
id_type!(RestaurantId, "restaurant");
id_type!(MenuItemId, "item");

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatusType {
    /// The order has been placed and is waiting for payment.
    Pending,
    /// Payment has settled and the restaurant can start on the order.
    Confirmed,
    /// The restaurant is preparing the food.
    Preparing,
    /// The food is packed and waiting for a delivery partner.
    ReadyForPickup,
    /// A delivery partner has collected the order.
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatusType {
    pub const ALL: [OrderStatusType; 8] = [
        Self::Pending,
        Self::Confirmed,
        Self::Preparing,
        Self::ReadyForPickup,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// The forward transition graph. Refunds are not part of it; see [`Self::can_refund`].
    pub fn allowed_targets(&self) -> &'static [OrderStatusType] {
        use OrderStatusType::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Preparing, Cancelled],
            Preparing => &[ReadyForPickup, Cancelled],
            ReadyForPickup => &[OutForDelivery],
            OutForDelivery => &[Delivered],
            Delivered | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatusType) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// A refund bypasses the forward graph and is permitted from every non-terminal status.
    pub fn can_refund(&self) -> bool {
        !self.is_terminal()
    }

    /// Position along the happy path, `PENDING` to `DELIVERED`. `None` for cancellation and refund.
    fn progress(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Preparing => Some(2),
            Self::ReadyForPickup => Some(3),
            Self::OutForDelivery => Some(4),
            Self::Delivered => Some(5),
            Self::Cancelled | Self::Refunded => None,
        }
    }

    /// True if this status is `target` or lies beyond it on the happy path, i.e. a request to move to `target` has
    /// already been carried out.
    pub fn has_reached(&self, target: OrderStatusType) -> bool {
        if *self == target {
            return true;
        }
        match (self.progress(), target.progress()) {
            (Some(current), Some(wanted)) => current > wanted,
            _ => false,
        }
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Preparing => "PREPARING",
            Self::ReadyForPickup => "READY_FOR_PICKUP",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "PREPARING" => Ok(Self::Preparing),
            "READY_FOR_PICKUP" => Ok(Self::ReadyForPickup),
            "OUT_FOR_DELIVERY" => Ok(Self::OutForDelivery),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------  PaymentStatusType    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatusType {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatusType {
    /// Settled payments are no longer polled.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether a status reported by the provider may replace `current`. Only an open payment (`PENDING` or
    /// `PROCESSING`) can settle, so a late or replayed signal never revives a failed or cancelled payment. `REFUNDED`
    /// is never reached this way; only a refund request moves a payment there.
    pub fn is_advance_from(&self, current: PaymentStatusType) -> bool {
        use PaymentStatusType::*;
        matches!(
            (current, self),
            (Pending, Processing) | (Pending | Processing, Completed | Failed | Cancelled)
        )
    }
}

impl Display for PaymentStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

impl From<String> for PaymentStatusType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to Pending");
            PaymentStatusType::Pending
        })
    }
}

//--------------------------------------    PaymentMethod      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    DigitalWallet,
    CashOnDelivery,
}

impl PaymentMethod {
    /// Cash is collected at the door and never goes through the payment provider.
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::CashOnDelivery)
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::DigitalWallet => "digital_wallet",
            Self::CashOnDelivery => "cash_on_delivery",
        };
        f.write_str(s)
    }
}

//--------------------------------------        Role           ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    RestaurantOwner,
    DeliveryPartner,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Customer => "customer",
            Self::RestaurantOwner => "restaurant_owner",
            Self::DeliveryPartner => "delivery_partner",
            Self::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "restaurant_owner" => Ok(Self::RestaurantOwner),
            "delivery_partner" => Ok(Self::DeliveryPartner),
            "admin" => Ok(Self::Admin),
            _ => Err(ConversionError(format!("Invalid role: {s}"))),
        }
    }
}

//--------------------------------------        Actor          ---------------------------------------------------------
/// Whoever is asking for a state change. Background jobs act as [`Actor::System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "role", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    Customer(UserId),
    RestaurantOwner(UserId),
    DeliveryPartner(UserId),
    Admin(UserId),
    #[default]
    System,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        match role {
            Role::Customer => Self::Customer(user_id),
            Role::RestaurantOwner => Self::RestaurantOwner(user_id),
            Role::DeliveryPartner => Self::DeliveryPartner(user_id),
            Role::Admin => Self::Admin(user_id),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Customer(id) | Self::RestaurantOwner(id) | Self::DeliveryPartner(id) | Self::Admin(id) => Some(*id),
            Self::System => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Customer(_) => Some(Role::Customer),
            Self::RestaurantOwner(_) => Some(Role::RestaurantOwner),
            Self::DeliveryPartner(_) => Some(Role::DeliveryPartner),
            Self::Admin(_) => Some(Role::Admin),
            Self::System => None,
        }
    }

    /// Admins and background jobs bypass the per-role transition rules.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin(_) | Self::System)
    }
}

impl Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            other => match (other.role(), other.user_id()) {
                (Some(role), Some(id)) => write!(f, "{role} {id}"),
                _ => f.write_str("unknown"),
            },
        }
    }
}

//--------------------------------------     Restaurant        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub owner_id: UserId,
    pub name: String,
    pub is_active: bool,
    /// Base delivery fee, charged in full up to the free-distance threshold.
    pub delivery_fee: Money,
    pub minimum_order: Money,
    /// Typical preparation time in minutes.
    pub delivery_time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRestaurant {
    pub owner_id: UserId,
    pub name: String,
    pub delivery_fee: Money,
    pub minimum_order: Money,
    pub delivery_time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub restaurant_id: RestaurantId,
    pub name: String,
    pub price: Money,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMenuItem {
    pub restaurant_id: RestaurantId,
    pub name: String,
    pub price: Money,
}

//--------------------------------------       Order           ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub customer_id: UserId,
    pub restaurant_id: RestaurantId,
    pub delivery_partner_id: Option<UserId>,
    pub status: OrderStatusType,
    pub payment_status: PaymentStatusType,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub tax_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
    pub delivery_address: String,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
    pub special_instructions: Option<String>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub prepared_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn totals_are_consistent(&self) -> bool {
        let expected = self
            .subtotal
            .checked_add(self.delivery_fee)
            .and_then(|m| m.checked_add(self.tax_amount))
            .and_then(|m| m.checked_sub(self.discount_amount));
        expected == Some(self.total_amount)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub menu_item_id: MenuItemId,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOrderItem {
    pub menu_item_id: MenuItemId,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
    pub special_instructions: Option<String>,
}

/// A fully priced order, ready to be stored. Produced by the order placement flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: UserId,
    pub restaurant_id: RestaurantId,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub tax_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
    pub delivery_address: String,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
    pub special_instructions: Option<String>,
    pub items: Vec<NewOrderItem>,
}

/// The complete set of order fields that may change after creation. Every write to an existing order goes through
/// one of these, applied by the storage layer in a single versioned update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub status: Option<OrderStatusType>,
    pub payment_status: Option<PaymentStatusType>,
    pub delivery_partner_id: Option<UserId>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub prepared_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl OrderUpdate {
    pub fn is_empty(&self) -> bool {
        *self == OrderUpdate::default()
    }

    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payment_status(mut self, status: PaymentStatusType) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn with_delivery_partner(mut self, partner: UserId) -> Self {
        self.delivery_partner_id = Some(partner);
        self
    }

    pub fn with_estimated_delivery_time(mut self, eta: DateTime<Utc>) -> Self {
        self.estimated_delivery_time = Some(eta);
        self
    }

    pub fn with_cancellation_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.cancellation_reason = Some(reason.into());
        self
    }

    /// Sets the timestamp that belongs to `status`, if there is one.
    pub fn stamp_for(mut self, status: OrderStatusType, at: DateTime<Utc>) -> Self {
        match status {
            OrderStatusType::Preparing => self.prepared_at = Some(at),
            OrderStatusType::OutForDelivery => self.picked_up_at = Some(at),
            OrderStatusType::Delivered => self.delivered_at = Some(at),
            OrderStatusType::Cancelled | OrderStatusType::Refunded => self.cancelled_at = Some(at),
            OrderStatusType::Pending | OrderStatusType::Confirmed | OrderStatusType::ReadyForPickup => {},
        }
        self
    }

    /// Applies the update to an in-memory copy, bumping the version. Used by backends that do not do this in SQL.
    pub fn apply_to(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(s) = self.status {
            order.status = s;
        }
        if let Some(s) = self.payment_status {
            order.payment_status = s;
        }
        if let Some(p) = self.delivery_partner_id {
            order.delivery_partner_id = Some(p);
        }
        if let Some(t) = self.estimated_delivery_time {
            order.estimated_delivery_time = Some(t);
        }
        if let Some(t) = self.prepared_at {
            order.prepared_at = Some(t);
        }
        if let Some(t) = self.picked_up_at {
            order.picked_up_at = Some(t);
        }
        if let Some(t) = self.delivered_at {
            order.delivered_at = Some(t);
        }
        if let Some(t) = self.cancelled_at {
            order.cancelled_at = Some(t);
        }
        if let Some(r) = &self.cancellation_reason {
            order.cancellation_reason = Some(r.clone());
        }
        order.version += 1;
        order.updated_at = now;
    }
}

//--------------------------------------      Payment          ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    /// The payment provider's id for this payment (e.g. a payment intent id). Never changes once set.
    pub provider_reference: String,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatusType,
    pub failure_reason: Option<String>,
    pub refund_amount: Money,
    pub refunded_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub order_id: OrderId,
    pub provider_reference: String,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
}

/// Mutable payment fields. See [`OrderUpdate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatusType>,
    pub failure_reason: Option<String>,
    pub refund_amount: Option<Money>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PaymentUpdate {
    pub fn with_status(mut self, status: PaymentStatusType) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = reason;
        self
    }

    /// Reserves `amount` for a refund that is still with the provider. The status is left alone.
    pub fn with_refund_claim(mut self, amount: Money) -> Self {
        self.refund_amount = Some(amount);
        self
    }

    pub fn with_refund(mut self, amount: Money, at: DateTime<Utc>) -> Self {
        self.refund_amount = Some(amount);
        self.refunded_at = Some(at);
        self
    }

    pub fn apply_to(&self, payment: &mut Payment, now: DateTime<Utc>) {
        if let Some(s) = self.status {
            payment.status = s;
        }
        if let Some(r) = &self.failure_reason {
            payment.failure_reason = Some(r.clone());
        }
        if let Some(a) = self.refund_amount {
            payment.refund_amount = a;
        }
        if let Some(t) = self.refunded_at {
            payment.refunded_at = Some(t);
        }
        payment.version += 1;
        payment.updated_at = now;
    }
}
