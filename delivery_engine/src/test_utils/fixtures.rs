//! Catalog and order fixtures shared by unit and integration tests.
use crate::{
    db::traits::CatalogManagement,
    db_types::{MenuItem, Money, NewMenuItem, NewRestaurant, Restaurant, UserId},
    flow_api::order_objects::{OrderLineRequest, NewOrderRequest},
};

pub const OWNER_ID: UserId = UserId(100);
pub const CUSTOMER_ID: UserId = UserId(200);
pub const OTHER_CUSTOMER_ID: UserId = UserId(201);
pub const PARTNER_ID: UserId = UserId(300);
pub const OTHER_PARTNER_ID: UserId = UserId(301);
pub const ADMIN_ID: UserId = UserId(1);

pub struct Menu {
    pub restaurant: Restaurant,
    /// 12.50
    pub pasta: MenuItem,
    /// 4.00
    pub salad: MenuItem,
}

/// A restaurant with a 2.99 delivery fee and the given minimum order, and two dishes.
pub async fn seed_menu<B: CatalogManagement>(db: &B, minimum_order: Money) -> Menu {
    let restaurant = db
        .insert_restaurant(NewRestaurant {
            owner_id: OWNER_ID,
            name: "Luigi's".into(),
            delivery_fee: Money::from(299),
            minimum_order,
            delivery_time: 25,
            latitude: None,
            longitude: None,
        })
        .await
        .expect("Error inserting restaurant");
    let pasta = db
        .insert_menu_item(NewMenuItem { restaurant_id: restaurant.id, name: "Pasta".into(), price: Money::from(1250) })
        .await
        .expect("Error inserting menu item");
    let salad = db
        .insert_menu_item(NewMenuItem { restaurant_id: restaurant.id, name: "Salad".into(), price: Money::from(400) })
        .await
        .expect("Error inserting menu item");
    Menu { restaurant, pasta, salad }
}

impl Menu {
    /// Two plates of pasta: a 25.00 subtotal.
    pub fn two_pastas(&self) -> NewOrderRequest {
        self.order_of(&[(&self.pasta, 2)])
    }

    pub fn order_of(&self, lines: &[(&MenuItem, i64)]) -> NewOrderRequest {
        NewOrderRequest {
            restaurant_id: self.restaurant.id,
            items: lines
                .iter()
                .map(|(item, quantity)| OrderLineRequest {
                    menu_item_id: item.id,
                    quantity: *quantity,
                    special_instructions: None,
                })
                .collect(),
            delivery_address: "12 Harbour Road".into(),
            delivery_latitude: None,
            delivery_longitude: None,
            special_instructions: None,
        }
    }
}
