use async_trait::async_trait;

use super::StoreError;
use crate::db_types::{MenuItem, MenuItemId, NewMenuItem, NewRestaurant, Restaurant, RestaurantId};

/// Read access to restaurants and menus, plus the inserts needed to seed them. Full catalogue management lives
/// elsewhere.
#[async_trait]
pub trait CatalogManagement {
    async fn insert_restaurant(&self, restaurant: NewRestaurant) -> Result<Restaurant, StoreError>;

    async fn insert_menu_item(&self, item: NewMenuItem) -> Result<MenuItem, StoreError>;

    async fn fetch_restaurant(&self, restaurant_id: RestaurantId) -> Result<Option<Restaurant>, StoreError>;

    async fn fetch_menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError>;

    async fn set_menu_item_availability(&self, id: MenuItemId, available: bool) -> Result<(), StoreError>;

    async fn set_restaurant_active(&self, id: RestaurantId, active: bool) -> Result<(), StoreError>;
}
