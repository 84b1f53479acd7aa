use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{MenuItem, MenuItemId, NewMenuItem, NewRestaurant, Restaurant, RestaurantId},
};

pub async fn insert_restaurant(
    restaurant: NewRestaurant,
    conn: &mut SqliteConnection,
) -> Result<Restaurant, SqliteDatabaseError> {
    let record = sqlx::query_as::<_, Restaurant>(
        r#"
        INSERT INTO restaurants (owner_id, name, is_active, delivery_fee, minimum_order, delivery_time, latitude,
                                 longitude)
        VALUES ($1, $2, 1, $3, $4, $5, $6, $7)
        RETURNING id, owner_id, name, is_active, delivery_fee, minimum_order, delivery_time, latitude, longitude;
        "#,
    )
    .bind(restaurant.owner_id)
    .bind(&restaurant.name)
    .bind(restaurant.delivery_fee)
    .bind(restaurant.minimum_order)
    .bind(restaurant.delivery_time)
    .bind(restaurant.latitude)
    .bind(restaurant.longitude)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn insert_menu_item(item: NewMenuItem, conn: &mut SqliteConnection) -> Result<MenuItem, SqliteDatabaseError> {
    let record = sqlx::query_as::<_, MenuItem>(
        r#"
        INSERT INTO menu_items (restaurant_id, name, price, is_available) VALUES ($1, $2, $3, 1)
        RETURNING id, restaurant_id, name, price, is_available;
        "#,
    )
    .bind(item.restaurant_id)
    .bind(&item.name)
    .bind(item.price)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_restaurant(
    id: RestaurantId,
    conn: &mut SqliteConnection,
) -> Result<Option<Restaurant>, SqliteDatabaseError> {
    let restaurant = sqlx::query_as::<_, Restaurant>(
        r#"
        SELECT id, owner_id, name, is_active, delivery_fee, minimum_order, delivery_time, latitude, longitude
        FROM restaurants WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(restaurant)
}

pub async fn fetch_menu_items(ids: &[MenuItemId], conn: &mut SqliteConnection) -> Result<Vec<MenuItem>, SqliteDatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT id, restaurant_id, name, price, is_available FROM menu_items WHERE id IN (");
    let mut list = builder.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    builder.push(") ORDER BY id ASC");
    Ok(builder.build_query_as::<MenuItem>().fetch_all(conn).await?)
}

/// Returns the number of rows touched, so the caller can report a missing item.
pub async fn set_menu_item_availability(
    id: MenuItemId,
    available: bool,
    conn: &mut SqliteConnection,
) -> Result<u64, SqliteDatabaseError> {
    let result =
        sqlx::query("UPDATE menu_items SET is_available = $1 WHERE id = $2").bind(available).bind(id).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn set_restaurant_active(
    id: RestaurantId,
    active: bool,
    conn: &mut SqliteConnection,
) -> Result<u64, SqliteDatabaseError> {
    let result =
        sqlx::query("UPDATE restaurants SET is_active = $1 WHERE id = $2").bind(active).bind(id).execute(conn).await?;
    Ok(result.rows_affected())
}
