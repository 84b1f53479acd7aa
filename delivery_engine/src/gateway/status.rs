use crate::db_types::PaymentStatusType;

/// Maps a provider payment status onto the internal [`PaymentStatusType`].
///
/// This is the only place the mapping lives. `last_error` matters for `requires_payment_method`, which is the
/// provider's state both for a fresh intent and for one whose last attempt was declined.
pub fn map_provider_status(status: &str, last_error: Option<&str>) -> PaymentStatusType {
    match status {
        "succeeded" => PaymentStatusType::Completed,
        "canceled" | "cancelled" => PaymentStatusType::Cancelled,
        "payment_failed" | "failed" => PaymentStatusType::Failed,
        "requires_payment_method" if last_error.is_some() => PaymentStatusType::Failed,
        "processing" | "requires_confirmation" | "requires_action" | "requires_capture" => {
            PaymentStatusType::Processing
        },
        _ => PaymentStatusType::Pending,
    }
}
