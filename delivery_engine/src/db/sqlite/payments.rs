use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{NewPayment, OrderId, Payment, PaymentId, PaymentStatusType, PaymentUpdate, UserId},
};

const PAYMENT_COLUMNS: &str = "id, order_id, provider_reference, amount, currency, method, status, failure_reason, \
                               refund_amount, refunded_at, version, created_at, updated_at";

pub async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, SqliteDatabaseError> {
    let sql = format!(
        r#"
        INSERT INTO payments (order_id, provider_reference, amount, currency, method, status, version, created_at,
                              updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $7)
        RETURNING {PAYMENT_COLUMNS};
        "#
    );
    let record = sqlx::query_as::<_, Payment>(&sql)
        .bind(payment.order_id)
        .bind(&payment.provider_reference)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.method)
        .bind(PaymentStatusType::Pending)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;
    debug!("🗃️ Payment {} for {} saved with id {}", record.provider_reference, record.order_id, record.id);
    Ok(record)
}

pub async fn fetch_payment(id: PaymentId, conn: &mut SqliteConnection) -> Result<Option<Payment>, SqliteDatabaseError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
    Ok(sqlx::query_as::<_, Payment>(&sql).bind(id).fetch_optional(conn).await?)
}

pub async fn fetch_payment_for_order(
    order_id: OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SqliteDatabaseError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1");
    Ok(sqlx::query_as::<_, Payment>(&sql).bind(order_id).fetch_optional(conn).await?)
}

pub async fn fetch_payment_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SqliteDatabaseError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_reference = $1");
    Ok(sqlx::query_as::<_, Payment>(&sql).bind(reference).fetch_optional(conn).await?)
}

/// All payments for orders placed by `customer_id`, newest first.
pub async fn fetch_payments_for_customer(
    customer_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, SqliteDatabaseError> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id IN (SELECT id FROM orders WHERE customer_id = $1) \
         ORDER BY created_at DESC, id DESC"
    );
    Ok(sqlx::query_as::<_, Payment>(&sql).bind(customer_id).fetch_all(conn).await?)
}

pub async fn fetch_unsettled_payments(
    before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, SqliteDatabaseError> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status IN ($1, $2) AND created_at < $3 ORDER BY id ASC"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(PaymentStatusType::Pending)
        .bind(PaymentStatusType::Processing)
        .bind(before)
        .fetch_all(conn)
        .await?;
    trace!("🗃️ {} unsettled payments found", payments.len());
    Ok(payments)
}

/// Versioned update. `Ok(None)` means no row matched: the payment is missing or its version has moved on.
pub async fn update_payment(
    id: PaymentId,
    expected_version: i64,
    update: PaymentUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE payments SET version = version + 1, updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ").push_bind(status);
    }
    if let Some(reason) = update.failure_reason {
        builder.push(", failure_reason = ").push_bind(reason);
    }
    if let Some(amount) = update.refund_amount {
        builder.push(", refund_amount = ").push_bind(amount);
    }
    if let Some(at) = update.refunded_at {
        builder.push(", refunded_at = ").push_bind(at);
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder.push(" AND version = ").push_bind(expected_version);
    builder.push(format!(" RETURNING {PAYMENT_COLUMNS}"));
    trace!("🗃️ Executing query: {}", builder.sql());
    Ok(builder.build_query_as::<Payment>().fetch_optional(conn).await?)
}

/// Returns `true` if the event id was not seen before.
pub async fn record_webhook_event(event_id: &str, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    let result = sqlx::query("INSERT OR IGNORE INTO webhook_events (event_id, created_at) VALUES ($1, $2)")
        .bind(event_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn forget_webhook_event(event_id: &str, conn: &mut SqliteConnection) -> Result<(), SqliteDatabaseError> {
    sqlx::query("DELETE FROM webhook_events WHERE event_id = $1").bind(event_id).execute(conn).await?;
    Ok(())
}

pub async fn prune_webhook_events(before: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, SqliteDatabaseError> {
    let result = sqlx::query("DELETE FROM webhook_events WHERE created_at < $1").bind(before).execute(conn).await?;
    Ok(result.rows_affected())
}
